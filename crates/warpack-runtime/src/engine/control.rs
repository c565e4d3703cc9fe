// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control port accepting the shutdown command.
//!
//! The protocol is a single unauthenticated plaintext command: a client
//! connects, writes the configured command and closes. Anyone able to reach
//! the port on localhost can stop the server.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::wait_until_set;

/// How long a connected client has to send the command.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Read at most `command.len()` bytes and compare them with `command`.
pub async fn read_command(stream: &mut TcpStream, command: &str) -> bool {
    let expected = command.as_bytes();
    let mut received = Vec::with_capacity(expected.len());
    let mut buf = [0u8; 256];

    let read = async {
        while received.len() < expected.len() {
            let want = (expected.len() - received.len()).min(buf.len());
            match stream.read(&mut buf[..want]).await {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) => {
                    debug!(error = %e, "Control connection read failed");
                    break;
                }
            }
        }
    };

    if tokio::time::timeout(READ_TIMEOUT, read).await.is_err() {
        warn!("Control connection timed out");
        return false;
    }
    received == expected
}

/// Accept control connections until the command arrives or `shutdown` fires.
///
/// Connections are handled one at a time. Returns `true` when the command
/// was received.
pub async fn run_control_socket(
    listener: TcpListener,
    command: String,
    shutdown: watch::Receiver<bool>,
) -> bool {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Control port accept failed");
                        continue;
                    }
                };
                if read_command(&mut stream, &command).await {
                    info!(peer = %peer, "Shutdown command received");
                    return true;
                }
                warn!(peer = %peer, "Invalid command received on control port");
            }
            _ = wait_until_set(shutdown.clone()) => {
                debug!("Control port closed");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn bound() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    async fn send(port: u16, payload: &str) {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(payload.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_matching_command_terminates() {
        let (listener, port) = bound().await;
        let (_tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_control_socket(listener, "STOPNOW".into(), rx));

        send(port, "STOPNOW").await;
        assert!(task.await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_command_is_ignored() {
        let (listener, port) = bound().await;
        let (_tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_control_socket(listener, "STOPNOW".into(), rx));

        send(port, "STOP").await;
        send(port, "HELLO!!").await;
        assert!(!task.is_finished());

        send(port, "STOPNOW").await;
        assert!(task.await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_closes_control_port() {
        let (listener, _port) = bound().await;
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_control_socket(listener, "STOPNOW".into(), rx));

        tx.send_replace(true);
        assert!(!task.await.unwrap());
    }
}
