// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in lifecycle observers.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::traits::{LifecycleEvent, LifecycleObserver, LifecycleSource, LifecycleState};
use crate::config::ObserverKind;
use crate::extraction::WorkLayout;

/// Logs every server state transition.
#[derive(Debug, Default)]
pub struct LifecycleLogObserver;

impl LifecycleObserver for LifecycleLogObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        match &event.source {
            LifecycleSource::Server => info!(state = %event.state, "Server lifecycle"),
            LifecycleSource::Deployment(handle) => {
                info!(deployment = %handle, state = %event.state, "Deployment lifecycle")
            }
        }
    }
}

/// Writes the process id to a file while the server is started.
#[derive(Debug)]
pub struct PidFileObserver {
    path: PathBuf,
}

impl PidFileObserver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LifecycleObserver for PidFileObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        if event.source != LifecycleSource::Server {
            return;
        }
        match event.state {
            LifecycleState::Started => {
                if let Err(e) = std::fs::write(&self.path, std::process::id().to_string()) {
                    warn!(path = %self.path.display(), error = %e, "Failed to write pid file");
                }
            }
            LifecycleState::Stopped | LifecycleState::Failed => {
                // Already gone is fine.
                let _ = std::fs::remove_file(&self.path);
            }
            _ => {}
        }
    }
}

/// Instantiate a configured observer.
pub fn build_observer(kind: ObserverKind, layout: &WorkLayout) -> Arc<dyn LifecycleObserver> {
    match kind {
        ObserverKind::LifecycleLog => Arc::new(LifecycleLogObserver),
        ObserverKind::PidFile => Arc::new(PidFileObserver::new(layout.pid_file())),
    }
}
