// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server engine trait definitions.
//!
//! Defines the capability interface the supervisor drives. Listener and
//! filter objects arrive fully configured; the engine only binds, mounts and
//! runs them.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{EnvironmentEntry, FilterSpec, ListenerSpec, ParameterEntry, ResourceBinding};
use crate::extraction::{ExtractionError, WorkLayout};

/// Errors from engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A listener or control port could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address being bound.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Operation not allowed in the current lifecycle state.
    #[error("cannot {operation} while server is {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Current state.
        state: LifecycleState,
    },

    /// The handle does not belong to this engine.
    #[error("unknown deployment: {0}")]
    UnknownDeployment(DeploymentHandle),

    /// The base directory was not set before starting.
    #[error("base directory not configured")]
    NoBaseDir,

    /// Preparing deployment content failed.
    #[error("deployment failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Lifecycle state of the server or of one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    New,
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Opaque reference to a registered deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentHandle {
    id: usize,
    context_path: String,
}

impl DeploymentHandle {
    /// Create a handle. Engines number their deployments from zero.
    pub fn new(id: usize, context_path: impl Into<String>) -> Self {
        Self {
            id,
            context_path: context_path.into(),
        }
    }

    /// Registration index.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Context path the deployment is mounted at.
    pub fn context_path(&self) -> &str {
        &self.context_path
    }
}

impl fmt::Display for DeploymentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context_path.is_empty() {
            write!(f, "#{} (root)", self.id)
        } else {
            write!(f, "#{} {}", self.id, self.context_path)
        }
    }
}

/// What changed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSource {
    Server,
    Deployment(DeploymentHandle),
}

/// A lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub source: LifecycleSource,
    pub state: LifecycleState,
}

/// Receives lifecycle transitions of the server or of a deployment.
pub trait LifecycleObserver: Send + Sync {
    /// Called after the transition happened.
    fn on_event(&self, event: &LifecycleEvent);
}

/// Everything the engine needs to mount one web application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentSpec {
    /// Mount path; empty means root.
    pub context_path: String,
    /// Artifact archive or directory.
    pub artifact: PathBuf,
    pub parameters: Vec<ParameterEntry>,
    pub environments: Vec<EnvironmentEntry>,
    pub resources: Vec<ResourceBinding>,
}

/// Deployment-specific configuration file handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextFile {
    /// File on disk.
    External(PathBuf),
    /// Entry inside the artifact archive.
    Embedded {
        /// Archive containing the entry.
        archive: PathBuf,
        /// Entry name.
        entry: String,
        /// Entry contents.
        contents: Vec<u8>,
    },
}

/// Capability interface of an embedded server engine.
///
/// All registration methods take `&self`; engines keep their state behind
/// interior mutability so that the shutdown hook can share the engine with
/// the main control path. `stop` must be safe to call more than once and
/// concurrently.
#[async_trait]
pub trait ServerEngine: Send + Sync {
    /// Engine name for logs.
    fn engine_type(&self) -> &'static str;

    /// Directory layout the engine works in.
    fn set_base_dir(&self, layout: &WorkLayout);

    /// Default deployment descriptor applied to every deployment.
    fn set_default_descriptor(&self, path: &Path);

    /// Register a network listener.
    fn add_listener(&self, listener: ListenerSpec) -> Result<()>;

    /// Register a request filter. Filters run in registration order.
    fn add_filter(&self, filter: FilterSpec) -> Result<()>;

    /// Observe server lifecycle transitions.
    fn add_lifecycle_observer(&self, observer: Arc<dyn LifecycleObserver>);

    /// Turn on the naming subsystem. Must be called before `start`.
    fn enable_naming(&self);

    /// Route identifier for sticky sessions.
    fn set_route(&self, route: &str);

    /// Register a deployment.
    fn deploy(&self, deployment: DeploymentSpec) -> Result<DeploymentHandle>;

    /// Observe lifecycle transitions of one deployment.
    fn observe_deployment(
        &self,
        handle: &DeploymentHandle,
        observer: Arc<dyn LifecycleObserver>,
    ) -> Result<()>;

    /// Keep or discard sessions across restarts.
    fn set_session_persistence(&self, handle: &DeploymentHandle, enabled: bool) -> Result<()>;

    /// Attach a deployment-specific configuration file.
    fn set_context_file(&self, handle: &DeploymentHandle, file: ContextFile) -> Result<()>;

    /// Accept `command` on `127.0.0.1:port` as a request to terminate.
    fn bind_control_port(&self, port: u16, command: &str) -> Result<()>;

    /// Bind listeners and start deployments.
    async fn start(&self) -> Result<()>;

    /// Stop listeners and deployments. Idempotent.
    ///
    /// A stop requested before the server is `Started` releases
    /// `await_termination` at once and is carried out when `start` finishes.
    async fn stop(&self) -> Result<()>;

    /// Block until the control port receives its command, `abort_await` is
    /// called or the engine stops.
    async fn await_termination(&self);

    /// Release `await_termination`.
    fn abort_await(&self);

    /// Current server state.
    fn state(&self) -> LifecycleState;
}
