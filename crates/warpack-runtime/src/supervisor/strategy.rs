// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment strategies.
//!
//! A strategy is told about every registered deployment and every lifecycle
//! change of those deployments. It can end the server's await through the
//! [`TerminationControl`] it is handed.

use std::sync::{Arc, Mutex, Weak};

use tracing::{error, info};

use crate::engine::{
    DeploymentHandle, LifecycleEvent, LifecycleObserver, LifecycleSource, LifecycleState,
    ServerEngine,
};
use crate::resolver::ArtifactSource;

/// Weak back-reference allowing a strategy to end the server's await.
#[derive(Clone)]
pub struct TerminationControl {
    engine: Weak<dyn ServerEngine>,
    reason: Arc<Mutex<Option<String>>>,
}

impl TerminationControl {
    pub fn new(engine: &Arc<dyn ServerEngine>) -> Self {
        Self {
            engine: Arc::downgrade(engine),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Release the server's await. The first reason given is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(|p| p.into_inner());
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.abort_await();
        }
    }

    /// Why the await was aborted, if it was.
    pub fn reason(&self) -> Option<String> {
        self.reason
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

/// Hooks around deployment registration.
pub trait DeploymentStrategy: Send + Sync {
    /// Called after a deployment was registered with the engine.
    fn on_deploy(&self, _handle: &DeploymentHandle, _artifact: &ArtifactSource) {}

    /// Called for every lifecycle change of a registered deployment.
    fn on_lifecycle_change(&self, _event: &LifecycleEvent, _control: &TerminationControl) {}
}

/// Default strategy: log deployments, abort the server when one fails.
#[derive(Debug, Default)]
pub struct AbortOnFailure {
    silent: bool,
}

impl AbortOnFailure {
    pub fn new(silent: bool) -> Self {
        Self { silent }
    }
}

impl DeploymentStrategy for AbortOnFailure {
    fn on_deploy(&self, handle: &DeploymentHandle, artifact: &ArtifactSource) {
        if !self.silent {
            info!(
                deployment = %handle,
                artifact = %artifact.path().display(),
                "Deployment registered"
            );
        }
    }

    fn on_lifecycle_change(&self, event: &LifecycleEvent, control: &TerminationControl) {
        if event.state != LifecycleState::Failed {
            return;
        }
        if let LifecycleSource::Deployment(handle) = &event.source {
            error!(deployment = %handle, "Deployment failed, shutting down server");
            control.abort(handle.context_path());
        }
    }
}

/// Adapts a strategy to the engine's observer interface.
pub(crate) struct StrategyObserver {
    pub(crate) strategy: Arc<dyn DeploymentStrategy>,
    pub(crate) control: TerminationControl,
}

impl LifecycleObserver for StrategyObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        self.strategy.on_lifecycle_change(event, &self.control);
    }
}
