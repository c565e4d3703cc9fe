// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration model.
//!
//! The configuration document is YAML and lives next to the artifact as
//! `config.yaml` unless an explicit path is given. A missing document yields
//! the default configuration; a malformed one is an error.
//!
//! Listener, filter and deployment entries accept a singular and a plural
//! form. Both may be present; the merged view lists plural entries first.
//!
//! ```yaml
//! extractDirectory: .warpack
//! shutdown: { port: 8005, command: STOPNOW }
//! listener: { port: "${HTTP_PORT}" }
//! deployments:
//!   - { contextPath: /shop, embeddedArtifact: "shop-*.war" }
//! ```

mod descriptors;
mod error;
mod objects;
mod properties;

pub use descriptors::{
    DEFAULT_SHUTDOWN_COMMAND, DeploymentDescriptor, Descriptor, EnvironmentEntry, ParameterEntry,
    ShutdownDescriptor, scalar_to_string,
};
pub use error::{ConfigError, Result};
pub use objects::{
    AccessLogFilter, FilterSpec, ListenerSpec, ObserverKind, Protocol, RemoteAddrFilter,
    ResourceBinding, ResponseHeaderFilter,
};
pub use properties::{LIBRARY_PATH, LOG_DIR, SystemProperties, TEMP_DIR, WORK_DIR};

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::secret;
use descriptors::merged;

/// Default configuration file name, resolved against the artifact directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Default extraction directory, resolved against the artifact directory.
pub const DEFAULT_EXTRACT_DIRECTORY: &str = ".warpack";

const LISTENER_PROTOCOL: &str = "protocol";

/// Root configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Configuration {
    /// Working directory for extracted content.
    pub extract_directory: PathBuf,
    /// Remote shutdown settings.
    pub shutdown: Option<ShutdownDescriptor>,
    /// Reduce logging to warnings.
    pub silent: bool,
    /// Stop the server on process termination signals.
    pub use_shutdown_hook: bool,
    /// Route identifier appended to session ids for sticky load balancing.
    pub route: Option<String>,
    /// Lifecycle observer names.
    pub observers: BTreeSet<String>,
    /// Process-level properties; values may be protected.
    pub system_properties: BTreeMap<String, serde_yaml::Value>,
    listener: Option<Descriptor>,
    listeners: Vec<Descriptor>,
    filter: Option<Descriptor>,
    filters: Vec<Descriptor>,
    deployment: Option<DeploymentDescriptor>,
    deployments: Vec<DeploymentDescriptor>,
    /// Directory containing the running artifact.
    #[serde(skip)]
    artifact_dir: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            extract_directory: PathBuf::from(DEFAULT_EXTRACT_DIRECTORY),
            shutdown: None,
            silent: false,
            use_shutdown_hook: false,
            route: None,
            observers: BTreeSet::from(["LifecycleLogObserver".to_string()]),
            system_properties: BTreeMap::new(),
            listener: None,
            listeners: Vec::new(),
            filter: None,
            filters: Vec::new(),
            deployment: None,
            deployments: Vec::new(),
            artifact_dir: PathBuf::from("."),
        }
    }
}

impl Configuration {
    /// Default document location for an artifact directory.
    pub fn default_path(artifact_dir: &Path) -> PathBuf {
        artifact_dir.join(DEFAULT_CONFIG_FILE)
    }

    /// Load the document at `path`, or the default configuration when it
    /// does not exist.
    pub fn read(path: &Path, artifact_dir: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                return Ok(Self::default().with_artifact_dir(artifact_dir));
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config = Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.with_artifact_dir(artifact_dir))
    }

    /// Parse a document. Blank or comment-only documents give the defaults.
    pub fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
        let blank = contents
            .lines()
            .map(str::trim)
            .all(|line| line.is_empty() || line.starts_with('#') || line == "---");
        if blank {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    /// Set the directory containing the running artifact.
    pub fn with_artifact_dir(mut self, artifact_dir: &Path) -> Self {
        self.artifact_dir = artifact_dir.to_path_buf();
        self
    }

    /// Directory containing the running artifact.
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Absolute (or artifact-relative) working directory.
    pub fn extract_dir(&self) -> PathBuf {
        if self.extract_directory.is_absolute() {
            self.extract_directory.clone()
        } else {
            self.artifact_dir.join(&self.extract_directory)
        }
    }

    /// Control port and command, when remote shutdown is enabled.
    pub fn shutdown_port(&self) -> Option<(u16, &str)> {
        let shutdown = self.shutdown.as_ref()?;
        shutdown.port.map(|port| (port, shutdown.command.as_str()))
    }

    /// Listener descriptors, plural then singular.
    pub fn listeners(&self) -> Vec<&Descriptor> {
        merged(&self.listeners, self.listener.as_ref())
    }

    /// Filter descriptors, plural then singular.
    pub fn filters(&self) -> Vec<&Descriptor> {
        merged(&self.filters, self.filter.as_ref())
    }

    /// Deployment descriptors, plural then singular.
    pub fn deployments(&self) -> Vec<&DeploymentDescriptor> {
        merged(&self.deployments, self.deployment.as_ref())
    }

    /// Decrypted system property values.
    ///
    /// Every name and decrypted value must be exportable to the process
    /// environment.
    pub fn system_property_values(&self, password: Option<&str>) -> Result<SystemProperties> {
        let mut props = SystemProperties::new();
        for (name, value) in &self.system_properties {
            let value = scalar_to_string(name, value)?;
            let value = secret::to_plaintext(&value, password)?;
            check_exportable(name, &value)?;
            props.set(name.clone(), value);
        }
        Ok(props)
    }

    /// Check system properties without decrypting them.
    pub fn check_system_properties(&self) -> Result<()> {
        for (name, value) in &self.system_properties {
            check_exportable(name, &scalar_to_string(name, value)?)?;
        }
        Ok(())
    }

    /// Build one listener per descriptor.
    ///
    /// Values of the form `${NAME}` are substituted first. Missing protocol,
    /// port and encoding take their defaults. Every other key must name a
    /// listener property. Without any descriptor a single default listener
    /// is returned.
    pub fn build_listener_objects(&self, props: &SystemProperties) -> Result<Vec<ListenerSpec>> {
        let descriptors = self.listeners();
        if descriptors.is_empty() {
            return Ok(vec![ListenerSpec::for_protocol(Protocol::DEFAULT)?]);
        }

        descriptors
            .into_iter()
            .map(|descriptor| {
                let mut values = BTreeMap::new();
                for (key, value) in descriptor {
                    values.insert(key.as_str(), props.substitute(&scalar_to_string(key, value)?));
                }

                let protocol = values
                    .remove(LISTENER_PROTOCOL)
                    .unwrap_or_else(|| Protocol::DEFAULT.to_string());
                let mut listener = ListenerSpec::for_protocol(&protocol)?;
                for (name, value) in values {
                    listener.set_property(name, &value)?;
                }
                Ok(listener)
            })
            .collect()
    }

    /// Build filters, skipping bad entries with a warning.
    pub fn build_filter_objects(&self, props: &SystemProperties) -> Vec<FilterSpec> {
        let mut filters = Vec::new();

        for descriptor in self.filters() {
            let Some(class_name) = descriptor.get(FilterSpec::CLASS_NAME) else {
                warn!("Missing className option in filter configuration");
                continue;
            };
            let class_name = match scalar_to_string(FilterSpec::CLASS_NAME, class_name) {
                Ok(name) => name,
                Err(e) => {
                    warn!(error = %e, "Invalid className in filter configuration");
                    continue;
                }
            };
            let Some(mut filter) = FilterSpec::for_class(&class_name) else {
                warn!(
                    class_name = %class_name,
                    known = ?FilterSpec::KINDS,
                    "Filter className not found"
                );
                continue;
            };

            let configured = descriptor
                .iter()
                .filter(|(key, _)| key.as_str() != FilterSpec::CLASS_NAME)
                .try_for_each(|(key, value)| {
                    let value = props.substitute(&scalar_to_string(key, value)?);
                    filter.set_property(key, &value)
                })
                .and_then(|()| filter.validate());

            match configured {
                Ok(()) => filters.push(filter),
                Err(e) => {
                    warn!(
                        class_name = %class_name,
                        error = %e,
                        "Filter configuration failed, skipping"
                    );
                }
            }
        }

        filters
    }

    /// Resolve configured lifecycle observers.
    pub fn build_observers(&self) -> Result<Vec<ObserverKind>> {
        self.observers.iter().map(|name| name.parse()).collect()
    }

    /// Whether any deployment needs the naming subsystem.
    pub fn is_naming_enabled(&self) -> bool {
        self.deployments()
            .iter()
            .any(|d| d.has_environments_or_resources() || d.context_file.is_some())
    }
}

/// Reject names and values `std::env::set_var` cannot take.
fn check_exportable(name: &str, value: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains(['=', '\0']) {
        "name contains '=' or NUL"
    } else if value.contains('\0') {
        "value contains NUL"
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidSystemProperty {
        name: name.to_string(),
        reason,
    })
}
