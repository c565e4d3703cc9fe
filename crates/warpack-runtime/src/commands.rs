// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sub-command implementations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigError, Configuration, SystemProperties};
use crate::engine::HttpEngine;
use crate::error::{Error, Result};
use crate::secret;
use crate::supervisor::Supervisor;
use crate::telemetry::LogHandle;

/// Where the archive lives and which directory relative paths resolve against.
#[derive(Debug, Clone)]
pub struct Paths {
    pub archive: PathBuf,
    pub artifact_dir: PathBuf,
}

impl Paths {
    /// Use `explicit` as the archive, or the running executable.
    pub fn locate(explicit: Option<PathBuf>) -> Result<Self> {
        let archive = match explicit {
            Some(path) => path,
            None => std::env::current_exe()?,
        };
        Ok(Self::for_archive(archive))
    }

    pub fn for_archive(archive: impl Into<PathBuf>) -> Self {
        let archive = archive.into();
        let artifact_dir = archive
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            archive,
            artifact_dir,
        }
    }

    /// Configuration file location. Relative paths resolve against the
    /// artifact directory.
    pub fn config_path(&self, explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.artifact_dir.join(path),
            None => Configuration::default_path(&self.artifact_dir),
        }
    }

    pub fn load_config(&self, explicit: Option<&Path>) -> Result<Configuration> {
        let path = self.config_path(explicit);
        Ok(Configuration::read(&path, &self.artifact_dir)?)
    }
}

/// Run the server with the built-in HTTP engine until it terminates.
pub async fn start(
    paths: &Paths,
    config: Configuration,
    password: Option<String>,
    clean: bool,
    log: Option<LogHandle>,
) -> Result<()> {
    let silent = config.silent;
    let mut builder = Supervisor::builder()
        .config(config)
        .engine(Arc::new(HttpEngine::new()))
        .archive(paths.archive.clone())
        .clean(clean)
        .password(password);
    if let Some(log) = log {
        builder = builder.on_extracted(move |layout| log.configure(silent, Some(&layout.logging)));
    }

    let supervisor = builder.build().map_err(|e| Error::Other(e.to_string()))?;
    supervisor.run().await?;
    Ok(())
}

/// Ask a running server to stop. Returns whether a command was sent.
pub async fn stop(config: &Configuration) -> Result<bool> {
    Ok(crate::shutdown::stop(config).await?)
}

/// Result of validating a configuration file.
#[derive(Debug)]
pub enum CheckOutcome {
    Valid(PathBuf),
    Missing(PathBuf),
    Invalid(PathBuf, ConfigError),
}

impl CheckOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, CheckOutcome::Valid(_))
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Valid(path) => write!(f, "Config file {} is OK", path.display()),
            CheckOutcome::Missing(path) => {
                write!(f, "Config file {} does not exist", path.display())
            }
            CheckOutcome::Invalid(path, e) => {
                write!(f, "Config file {} is invalid: {e}", path.display())
            }
        }
    }
}

/// Parse the document and build its typed objects without binding anything.
pub fn check_config(path: &Path, artifact_dir: &Path) -> CheckOutcome {
    if !path.exists() {
        return CheckOutcome::Missing(path.to_path_buf());
    }
    match validate(path, artifact_dir) {
        Ok(()) => CheckOutcome::Valid(path.to_path_buf()),
        Err(e) => CheckOutcome::Invalid(path.to_path_buf(), e),
    }
}

fn validate(path: &Path, artifact_dir: &Path) -> std::result::Result<(), ConfigError> {
    let config = Configuration::read(path, artifact_dir)?;
    config.build_observers()?;
    config.check_system_properties()?;
    config.build_listener_objects(&SystemProperties::new())?;
    for deployment in config.deployments() {
        deployment.resource_bindings()?;
    }
    Ok(())
}

/// Protect `plaintext`: `ENC` with a password, `OBF` without.
pub fn obfuscate(plaintext: &str, password: Option<&str>) -> Result<String> {
    let protected = match password {
        Some(password) => secret::encrypt(plaintext, password)?,
        None => secret::obfuscate(plaintext),
    };
    info!(
        scheme = if password.is_some() { secret::ENC_PREFIX } else { secret::OBF_PREFIX },
        "Value protected"
    );
    Ok(protected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_relative_to_archive() {
        let paths = Paths::for_archive("/opt/app/shop.bin");
        assert_eq!(paths.artifact_dir, PathBuf::from("/opt/app"));
        assert_eq!(paths.config_path(None), PathBuf::from("/opt/app/config.yaml"));
        assert_eq!(
            paths.config_path(Some(Path::new("conf/prod.yaml"))),
            PathBuf::from("/opt/app/conf/prod.yaml")
        );
        assert_eq!(
            paths.config_path(Some(Path::new("/etc/warpack.yaml"))),
            PathBuf::from("/etc/warpack.yaml")
        );
    }

    #[test]
    fn test_bare_archive_name() {
        let paths = Paths::for_archive("shop.bin");
        assert_eq!(paths.artifact_dir, PathBuf::from("."));
    }

    #[test]
    fn test_check_config_valid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "listener:\n  port: 8081\nsilent: true\n").unwrap();

        let outcome = check_config(&path, dir.path());
        assert!(outcome.is_valid(), "{outcome}");
        assert_eq!(outcome.to_string(), format!("Config file {} is OK", path.display()));
    }

    #[test]
    fn test_check_config_missing() {
        let dir = TempDir::new().unwrap();
        let outcome = check_config(&dir.path().join("config.yaml"), dir.path());
        assert!(matches!(outcome, CheckOutcome::Missing(_)));
    }

    #[test]
    fn test_check_config_wrong_numeric_type() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        std::fs::write(&path, "shutdown:\n  port: eighty\n").unwrap();
        assert!(matches!(
            check_config(&path, dir.path()),
            CheckOutcome::Invalid(_, ConfigError::Parse { .. })
        ));

        std::fs::write(&path, "listener:\n  port: eighty\n").unwrap();
        assert!(matches!(
            check_config(&path, dir.path()),
            CheckOutcome::Invalid(_, ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_check_config_rejects_unexportable_property() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "systemProperties:\n  \"a=b\": x\n").unwrap();

        assert!(matches!(
            check_config(&path, dir.path()),
            CheckOutcome::Invalid(_, ConfigError::InvalidSystemProperty { .. })
        ));
    }

    #[test]
    fn test_obfuscate_schemes() {
        let obf = obfuscate("secret", None).unwrap();
        assert!(obf.starts_with(secret::OBF_PREFIX));
        assert_eq!(secret::to_plaintext(&obf, None).unwrap(), "secret");

        let enc = obfuscate("secret", Some("pw")).unwrap();
        assert!(enc.starts_with(secret::ENC_PREFIX));
        assert_eq!(secret::to_plaintext(&enc, Some("pw")).unwrap(), "secret");
    }
}
