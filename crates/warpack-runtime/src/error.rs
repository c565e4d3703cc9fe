// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for warpack-runtime.

use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A protected value could not be decoded.
    #[error("Secret error: {0}")]
    Secret(#[from] crate::secret::SecretError),

    /// Preparing the working directory failed.
    #[error("Extraction error: {0}")]
    Extraction(#[from] crate::extraction::ExtractionError),

    /// No artifact matched a deployment.
    #[error("Resolve error: {0}")]
    Resolve(#[from] crate::resolver::ResolveError),

    /// Server startup or supervision failed.
    #[error("Server error: {0}")]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    /// Sending the shutdown command failed.
    #[error("Shutdown error: {0}")]
    Shutdown(#[from] crate::shutdown::ShutdownError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the runtime Error.
pub type Result<T> = std::result::Result<T, Error>;
