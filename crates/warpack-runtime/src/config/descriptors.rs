// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Descriptor types read from the configuration document.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_yaml::Value;

use super::error::{ConfigError, Result};
use super::objects::ResourceBinding;
use crate::secret;

/// Generic key/value description of a listener or filter.
pub type Descriptor = BTreeMap<String, Value>;

/// Default command expected on the control port.
pub const DEFAULT_SHUTDOWN_COMMAND: &str = "SHUTDOWN_WARPACK";

/// Render a scalar YAML value as a string.
pub fn scalar_to_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        Value::Tagged(tagged) => scalar_to_string(key, &tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => Err(ConfigError::NonScalar {
            key: key.to_string(),
        }),
    }
}

/// Remote shutdown settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ShutdownDescriptor {
    /// Control port on localhost. Absent disables remote shutdown.
    #[serde(default)]
    pub port: Option<u16>,
    /// Command string the control port waits for.
    #[serde(default = "default_shutdown_command")]
    pub command: String,
}

fn default_shutdown_command() -> String {
    DEFAULT_SHUTDOWN_COMMAND.to_string()
}

impl Default for ShutdownDescriptor {
    fn default() -> Self {
        Self {
            port: None,
            command: default_shutdown_command(),
        }
    }
}

/// A naming environment entry exposed to a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnvironmentEntry {
    pub name: String,
    #[serde(rename = "type", default = "default_entry_type")]
    pub value_type: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default = "default_true")]
    pub r#override: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// An initialization parameter passed to a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ParameterEntry {
    pub name: String,
    pub value: String,
    #[serde(default = "default_true")]
    pub r#override: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_entry_type() -> String {
    "java.lang.String".to_string()
}

fn default_true() -> bool {
    true
}

/// One web application to serve.
///
/// `embeddedArtifact` takes precedence over `externalArtifact`; with neither
/// set the first discovered artifact is used.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct DeploymentDescriptor {
    /// Mount path; empty means root.
    pub context_path: String,
    /// File name or `*` pattern of an extracted artifact.
    pub embedded_artifact: Option<String>,
    /// Artifact outside the archive, relative to the artifact directory.
    pub external_artifact: Option<PathBuf>,
    /// External context file passed to the engine.
    pub context_file: Option<PathBuf>,
    /// Keep sessions across restarts.
    pub session_persistence: bool,
    resource: Option<Descriptor>,
    resources: Vec<Descriptor>,
    environment: Option<EnvironmentEntry>,
    environments: Vec<EnvironmentEntry>,
    parameter: Option<ParameterEntry>,
    parameters: Vec<ParameterEntry>,
}

/// Plural entries first, then the singular one.
pub(crate) fn merged<'a, T>(many: &'a [T], one: Option<&'a T>) -> Vec<&'a T> {
    many.iter().chain(one).collect()
}

impl DeploymentDescriptor {
    /// Deployment at `context_path` using the first discovered artifact.
    pub fn at(context_path: impl Into<String>) -> Self {
        Self {
            context_path: context_path.into(),
            ..Self::default()
        }
    }

    /// Resource descriptors, plural then singular.
    pub fn resources(&self) -> Vec<&Descriptor> {
        merged(&self.resources, self.resource.as_ref())
    }

    /// Environment entries, plural then singular.
    pub fn environments(&self) -> Vec<&EnvironmentEntry> {
        merged(&self.environments, self.environment.as_ref())
    }

    /// Parameters, plural then singular.
    pub fn parameters(&self) -> Vec<&ParameterEntry> {
        merged(&self.parameters, self.parameter.as_ref())
    }

    /// Whether the deployment needs the naming subsystem.
    pub fn has_environments_or_resources(&self) -> bool {
        self.resource.is_some()
            || !self.resources.is_empty()
            || self.environment.is_some()
            || !self.environments.is_empty()
    }

    /// Build typed resource bindings.
    pub fn resource_bindings(&self) -> Result<Vec<ResourceBinding>> {
        self.resources()
            .into_iter()
            .map(ResourceBinding::from_descriptor)
            .collect()
    }

    /// Replace protected values with their plaintext.
    ///
    /// Covers parameter values, environment values and every string value of
    /// a resource descriptor.
    pub fn decrypt_secrets(&mut self, password: Option<&str>) -> Result<()> {
        let params = self.parameters.iter_mut().chain(self.parameter.as_mut());
        for param in params {
            param.value = secret::to_plaintext(&param.value, password)?;
        }

        let envs = self.environments.iter_mut().chain(self.environment.as_mut());
        for env in envs {
            if let Some(value) = env.value.as_mut() {
                *value = secret::to_plaintext(value, password)?;
            }
        }

        let resources = self.resources.iter_mut().chain(self.resource.as_mut());
        for resource in resources {
            for value in resource.values_mut() {
                if let Value::String(s) = value {
                    *s = secret::to_plaintext(s, password)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> DeploymentDescriptor {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_scalar_to_string() {
        assert_eq!(scalar_to_string("k", &Value::from(8080)).unwrap(), "8080");
        assert_eq!(scalar_to_string("k", &Value::from(true)).unwrap(), "true");
        assert_eq!(scalar_to_string("k", &Value::from("x")).unwrap(), "x");
        assert!(matches!(
            scalar_to_string("k", &Value::Sequence(vec![])),
            Err(ConfigError::NonScalar { .. })
        ));
    }

    #[test]
    fn test_shutdown_defaults() {
        let d: ShutdownDescriptor = serde_yaml::from_str("port: 8088").unwrap();
        assert_eq!(d.port, Some(8088));
        assert_eq!(d.command, DEFAULT_SHUTDOWN_COMMAND);
    }

    #[test]
    fn test_merge_plural_then_singular() {
        let d = parse(
            r#"
parameters:
  - { name: a, value: "1" }
  - { name: b, value: "2" }
parameter: { name: c, value: "3" }
"#,
        );
        let names: Vec<_> = d.parameters().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_naming_requirements() {
        assert!(!parse("contextPath: /app").has_environments_or_resources());
        assert!(parse("resource: { name: jdbc/db }").has_environments_or_resources());
        assert!(parse("environment: { name: flag, value: x }").has_environments_or_resources());
    }

    #[test]
    fn test_decrypt_secrets() {
        let hidden = secret::obfuscate("tiger");
        let enc = secret::encrypt("scott", "pw").unwrap();
        let mut d = parse(&format!(
            r#"
resource: {{ name: jdbc/db, password: "{hidden}", maxTotal: 10 }}
parameter: {{ name: user, value: "{enc}" }}
"#
        ));

        d.decrypt_secrets(Some("pw")).unwrap();

        let res = d.resources()[0];
        assert_eq!(res["password"], Value::from("tiger"));
        assert_eq!(res["maxTotal"], Value::from(10));
        assert_eq!(d.parameters()[0].value, "scott");
    }

    #[test]
    fn test_decrypt_secrets_without_password_fails_for_enc() {
        let enc = secret::encrypt("scott", "pw").unwrap();
        let mut d = parse(&format!("parameter: {{ name: user, value: \"{enc}\" }}"));
        assert!(matches!(
            d.decrypt_secrets(None),
            Err(ConfigError::Secret(_))
        ));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(serde_yaml::from_str::<DeploymentDescriptor>("warFile: x.war").is_err());
    }
}
