// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command line surface.
//!
//! `warpack` without arguments starts the server, and so does a first token
//! that is not a sub-command: `warpack -c` is `warpack start -c`.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Environment variable naming the archive when not running from it.
pub const ARCHIVE_ENV: &str = "WARPACK_ARCHIVE";

/// Tokens accepted as the first argument without inserting `start`.
const KNOWN_FIRST_TOKENS: &[&str] = &[
    "start",
    "stop",
    "checkConfig",
    "check-config",
    "obfuscate",
    "help",
    "-h",
    "--help",
    "-V",
    "--version",
];

const ARCHIVE_FLAG: &str = "--archive";

/// warpack - self-contained web archive runtime
#[derive(Parser, Debug)]
#[command(name = "warpack")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Archive carrying the artifacts (defaults to this executable)
    #[arg(long, global = true, env = ARCHIVE_ENV)]
    pub archive: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Extract, configure and run the server
    Start {
        /// Configuration file (default: config.yaml next to the archive)
        config: Option<PathBuf>,

        /// Password for ENC values
        #[arg(short, long)]
        password: Option<String>,

        /// Discard the working directory and extract again
        #[arg(short, long)]
        clean: bool,
    },

    /// Send the shutdown command to a running server
    Stop {
        /// Configuration file (default: config.yaml next to the archive)
        config: Option<PathBuf>,
    },

    /// Validate a configuration file
    #[command(name = "checkConfig", alias = "check-config")]
    CheckConfig {
        /// Configuration file (default: config.yaml next to the archive)
        config: Option<PathBuf>,
    },

    /// Protect a value for use in the configuration file
    Obfuscate {
        /// Value to protect
        plaintext: String,

        /// Encrypt with this password instead of obfuscating
        #[arg(short, long)]
        password: Option<String>,
    },
}

impl Cli {
    /// Parse the process arguments after normalisation.
    pub fn parse_normalized() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }
}

/// Insert the implicit `start` sub-command where needed.
///
/// The first element is the program name. A leading global `--archive`
/// option is skipped when looking for the sub-command.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    if args.is_empty() {
        args.push(OsString::from("warpack"));
    }

    let mut index = 1;
    while let Some(token) = args.get(index).and_then(|t| t.to_str()) {
        if token == ARCHIVE_FLAG {
            index += 2;
        } else if token.starts_with("--archive=") {
            index += 1;
        } else {
            break;
        }
    }

    let known = args
        .get(index)
        .and_then(|t| t.to_str())
        .is_some_and(|t| KNOWN_FIRST_TOKENS.contains(&t));
    if !known {
        let at = index.min(args.len());
        args.insert(at, OsString::from("start"));
    }
    args
}
