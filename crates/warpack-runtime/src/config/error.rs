// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::secret::SecretError;

/// Errors raised while loading the configuration document or building
/// server objects from it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The document exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Document path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML or does not match the schema.
    #[error("invalid configuration {path}: {source}")]
    Parse {
        /// Document path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A listener names a protocol no engine supports.
    #[error("unsupported listener protocol '{0}'")]
    UnsupportedProtocol(String),

    /// A property name has no setter on the target object.
    #[error("unknown property '{name}' for {object}")]
    UnknownProperty {
        /// Object kind, e.g. `listener`.
        object: &'static str,
        /// Offending property name.
        name: String,
    },

    /// A property value could not be converted to the setter's type.
    #[error("invalid value '{value}' for {object} property '{name}': {reason}")]
    InvalidValue {
        /// Object kind.
        object: &'static str,
        /// Property name.
        name: String,
        /// Raw value.
        value: String,
        /// Conversion failure.
        reason: String,
    },

    /// A descriptor value is a sequence or mapping where a scalar is expected.
    #[error("value of '{key}' must be a scalar")]
    NonScalar {
        /// Offending key.
        key: String,
    },

    /// A required field is missing.
    #[error("{object} is missing required field '{field}'")]
    MissingField {
        /// Object kind.
        object: &'static str,
        /// Field name.
        field: &'static str,
    },

    /// A system property the process environment cannot hold.
    #[error("system property '{name}': {reason}")]
    InvalidSystemProperty {
        /// Property name.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A lifecycle observer name is not known.
    #[error("unknown lifecycle observer '{0}'")]
    UnknownObserver(String),

    /// A protected value could not be decoded.
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
