// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! warpack - self-contained web archive launcher
//!
//! Extracts the artifacts carried by this executable and serves them until a
//! shutdown command or termination signal arrives.

use std::process::ExitCode;

use tracing::{debug, error, info};

use warpack_runtime::cli::{Cli, Command};
use warpack_runtime::commands::{self, Paths};
use warpack_runtime::config::SystemProperties;
use warpack_runtime::telemetry::{self, LogHandle};

fn main() -> ExitCode {
    // Load .env file if present
    let dotenv = dotenvy::dotenv();

    let log = telemetry::init();
    if let Err(e) = dotenv {
        debug!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse_normalized();
    match run(cli, log) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "warpack failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, log: LogHandle) -> anyhow::Result<ExitCode> {
    let paths = Paths::locate(cli.archive)?;

    match cli.command {
        Command::Obfuscate {
            plaintext,
            password,
        } => {
            println!("{}", commands::obfuscate(&plaintext, password.as_deref())?);
            Ok(ExitCode::SUCCESS)
        }

        Command::CheckConfig { config } => {
            let path = paths.config_path(config.as_deref());
            let outcome = commands::check_config(&path, &paths.artifact_dir);
            println!("{outcome}");
            Ok(if outcome.is_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Stop { config } => {
            let config = paths.load_config(config.as_deref())?;
            let sent = runtime()?.block_on(commands::stop(&config))?;
            if !sent {
                info!("Remote shutdown is not enabled");
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Start {
            config,
            password,
            clean,
        } => {
            let config = paths.load_config(config.as_deref())?;
            log.configure(config.silent, None);

            let props = config.system_property_values(password.as_deref())?;
            export_properties(&props);

            info!(archive = %paths.archive.display(), "Starting warpack");
            runtime()?.block_on(commands::start(&paths, config, password, clean, Some(log)))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Make configured system properties visible to the process environment.
fn export_properties(props: &SystemProperties) {
    for (name, value) in props.iter() {
        // SAFETY: called from main before the async runtime exists; no other
        // thread reads or writes the environment.
        unsafe { std::env::set_var(name, value) };
    }
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}
