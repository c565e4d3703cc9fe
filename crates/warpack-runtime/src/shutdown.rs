// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client side of the remote shutdown protocol.
//!
//! Connects to the configured shutdown port on the local host and writes the
//! command bytes. Nothing is read back.

use std::net::{Ipv4Addr, SocketAddr};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::Configuration;

/// Errors from sending a shutdown command.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShutdownError {
    /// No server accepted the connection.
    #[error("cannot connect to shutdown port {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Writing the command failed.
    #[error("cannot send shutdown command to {addr}: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for shutdown operations.
pub type Result<T> = std::result::Result<T, ShutdownError>;

/// Write `command` to the control socket on `localhost:port`.
pub async fn send_shutdown(port: u16, command: &str) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|source| ShutdownError::Connect { addr, source })?;

    let send = async {
        stream.write_all(command.as_bytes()).await?;
        stream.flush().await?;
        stream.shutdown().await
    };
    send.await
        .map_err(|source| ShutdownError::Send { addr, source })?;

    info!(port, "Shutdown command sent");
    Ok(())
}

/// Stop a running instance using the configuration's shutdown settings.
///
/// Returns `Ok(false)` without connecting when no shutdown port is
/// configured.
pub async fn stop(config: &Configuration) -> Result<bool> {
    let Some((port, command)) = config.shutdown_port() else {
        debug!("No shutdown port configured, nothing to stop");
        return Ok(false);
    };
    send_shutdown(port, command).await?;
    Ok(true)
}
