// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for warpack-runtime integration tests.
//!
//! Provides TestArchive for building fixture archives next to a
//! configuration file in a temporary artifact directory.

#![allow(dead_code)]

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use warpack_runtime::config::Configuration;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Build timestamp written into fixture archives.
pub const BUILD_TIMESTAMP: &str = "1700000000000";

/// An archive plus its artifact directory.
pub struct TestArchive {
    pub dir: tempfile::TempDir,
    pub archive: PathBuf,
}

impl TestArchive {
    /// Archive carrying the given artifacts at its root.
    pub fn with_artifacts(artifacts: &[(&str, Vec<u8>)]) -> Self {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let archive = dir.path().join("app.bin");

        let mut zip = ZipWriter::new(File::create(&archive).expect("Failed to create archive"));
        let options = SimpleFileOptions::default();
        zip.start_file("BUILD_TIMESTAMP", options).unwrap();
        zip.write_all(BUILD_TIMESTAMP.as_bytes()).unwrap();
        for (name, bytes) in artifacts {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap();

        Self { dir, archive }
    }

    /// Artifact directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Working directory used with the default configuration.
    pub fn work_dir(&self) -> PathBuf {
        self.path().join(".warpack")
    }

    /// Parse `yaml` as the configuration of this archive.
    pub fn config(&self, yaml: &str) -> Configuration {
        let path = self.path().join("config.yaml");
        std::fs::write(&path, yaml).expect("Failed to write config");
        Configuration::read(&path, self.path()).expect("Failed to read config")
    }
}

/// A web artifact (zip) containing `files`.
pub fn war(files: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, contents) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A port nothing listens on right now.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    listener.local_addr().unwrap().port()
}
