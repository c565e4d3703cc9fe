// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server supervisor.
//!
//! Drives one engine through startup, await and shutdown:
//!
//! 1. decrypt system properties
//! 2. bring the working directory up to date
//! 3. build listener objects and probe their ports; any port in use aborts
//!    before the engine sees a single registration
//! 4. register listeners, filters, lifecycle observers, naming and route
//! 5. per deployment: decrypt secrets, resolve the artifact, deploy, attach
//!    the strategy, set session persistence and the context file
//! 6. bind the control port when a shutdown port is configured
//! 7. start, then await termination and stop
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warpack_runtime::config::Configuration;
//! use warpack_runtime::engine::HttpEngine;
//! use warpack_runtime::supervisor::Supervisor;
//!
//! let supervisor = Supervisor::builder()
//!     .config(Configuration::read(&path, &artifact_dir)?)
//!     .engine(Arc::new(HttpEngine::new()))
//!     .archive(archive)
//!     .build()?;
//! supervisor.run().await?;
//! ```

mod strategy;

pub use strategy::{AbortOnFailure, DeploymentStrategy, TerminationControl};

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{
    ConfigError, Configuration, DeploymentDescriptor, LIBRARY_PATH, ListenerSpec, LOG_DIR,
    SystemProperties, TEMP_DIR, WORK_DIR,
};
use crate::engine::{ContextFile, DeploymentSpec, EngineError, ServerEngine, build_observer};
use crate::extraction::{
    Extraction, ExtractionError, ExtractionManager, WorkLayout, read_archive_entry,
};
use crate::resolver::{ArtifactResolver, ArtifactSource, ResolveError};
use crate::signals::wait_for_shutdown_signal;
use strategy::StrategyObserver;

/// Context file looked up inside an artifact archive.
pub const EMBEDDED_CONTEXT_FILE: &str = "META-INF/context.xml";

/// Errors from the supervisor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Extraction failed.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Artifact resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Engine operation failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A listener port is already bound by another process.
    #[error("port {} already in use", addr.port())]
    PortInUse {
        /// Listener address.
        addr: SocketAddr,
    },

    /// Probing a listener port failed for another reason.
    #[error("cannot bind {addr}: {source}")]
    Preflight {
        /// Listener address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A deployment reached the failed state.
    #[error("deployment '{context_path}' failed")]
    DeploymentFailed {
        /// Context path of the failed deployment.
        context_path: String,
    },

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

type ExtractedHook = Box<dyn Fn(&WorkLayout) + Send + Sync>;

type SignalFuture = Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>>;
type ShutdownSignal = Box<dyn Fn() -> SignalFuture + Send + Sync>;

/// Bind and immediately release every listener port, sequentially.
///
/// Port 0 asks the OS for a free port and is never probed.
pub fn preflight(listeners: &[ListenerSpec]) -> Result<()> {
    for listener in listeners.iter().filter(|l| l.port != 0) {
        let addr = listener.socket_addr();
        match std::net::TcpListener::bind(addr) {
            Ok(probe) => drop(probe),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                error!(port = addr.port(), "Port already in use");
                return Err(SupervisorError::PortInUse { addr });
            }
            Err(source) => return Err(SupervisorError::Preflight { addr, source }),
        }
    }
    Ok(())
}

/// Builder for creating a [`Supervisor`].
#[derive(Default)]
pub struct SupervisorBuilder {
    config: Option<Configuration>,
    engine: Option<Arc<dyn ServerEngine>>,
    archive: Option<PathBuf>,
    clean: bool,
    password: Option<String>,
    strategy: Option<Arc<dyn DeploymentStrategy>>,
    on_extracted: Option<ExtractedHook>,
    shutdown_signal: Option<ShutdownSignal>,
}

impl SupervisorBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    ///
    /// Default: [`Configuration::default`]
    pub fn config(mut self, config: Configuration) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the server engine (required).
    pub fn engine(mut self, engine: Arc<dyn ServerEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the archive carrying the artifacts (required).
    pub fn archive(mut self, archive: impl Into<PathBuf>) -> Self {
        self.archive = Some(archive.into());
        self
    }

    /// Force a fresh extraction.
    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    /// Password for `ENC` values.
    pub fn password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    /// Set the deployment strategy.
    ///
    /// Default: [`AbortOnFailure`]
    pub fn strategy(mut self, strategy: Arc<dyn DeploymentStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Run `hook` once the working directory is ready.
    pub fn on_extracted(mut self, hook: impl Fn(&WorkLayout) + Send + Sync + 'static) -> Self {
        self.on_extracted = Some(Box::new(hook));
        self
    }

    /// Set the future that triggers the shutdown hook.
    ///
    /// Default: SIGINT, SIGTERM or SIGQUIT. Only used with `useShutdownHook`.
    pub fn shutdown_signal<F, Fut>(mut self, signal: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::io::Result<()>> + Send + 'static,
    {
        self.shutdown_signal = Some(Box::new(move || -> SignalFuture { Box::pin(signal()) }));
        self
    }

    /// Build the supervisor.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> anyhow::Result<Supervisor> {
        let engine = self
            .engine
            .ok_or_else(|| anyhow::anyhow!("engine is required"))?;
        let archive = self
            .archive
            .ok_or_else(|| anyhow::anyhow!("archive is required"))?;
        let config = self.config.unwrap_or_default();
        let strategy = self
            .strategy
            .unwrap_or_else(|| Arc::new(AbortOnFailure::new(config.silent)));
        let control = TerminationControl::new(&engine);
        let shutdown_signal = self.shutdown_signal.unwrap_or_else(|| {
            Box::new(|| -> SignalFuture { Box::pin(wait_for_shutdown_signal()) })
        });

        Ok(Supervisor {
            config,
            engine,
            archive,
            clean: self.clean,
            password: self.password,
            strategy,
            control,
            on_extracted: self.on_extracted,
            shutdown_signal,
        })
    }
}

/// Owns the engine for the lifetime of the process.
pub struct Supervisor {
    config: Configuration,
    engine: Arc<dyn ServerEngine>,
    archive: PathBuf,
    clean: bool,
    password: Option<String>,
    strategy: Arc<dyn DeploymentStrategy>,
    control: TerminationControl,
    on_extracted: Option<ExtractedHook>,
    shutdown_signal: ShutdownSignal,
}

impl Supervisor {
    /// Create a new builder.
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    /// The supervised engine.
    pub fn engine(&self) -> &Arc<dyn ServerEngine> {
        &self.engine
    }

    /// Start, then block until termination.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;
        self.wait().await
    }

    /// Prepare, configure and start the engine.
    pub async fn start(&self) -> Result<Extraction> {
        let config = &self.config;
        let mut props = config.system_property_values(self.password.as_deref())?;
        let observers = config.build_observers()?;

        let manager = ExtractionManager::new(&self.archive, config.extract_dir());
        let clean = self.clean;
        let extraction = tokio::task::spawn_blocking(move || manager.prepare(clean))
            .await
            .map_err(|e| SupervisorError::Task(e.to_string()))??;
        let layout = &extraction.layout;
        if let Some(hook) = &self.on_extracted {
            hook(layout);
        }
        derived_properties(&mut props, layout);

        let listeners = config.build_listener_objects(&props)?;
        preflight(&listeners)?;

        let engine = &self.engine;
        info!(
            engine = engine.engine_type(),
            work_dir = %layout.root.display(),
            "Configuring server"
        );
        engine.set_base_dir(layout);
        if layout.web_xml.is_file() {
            engine.set_default_descriptor(&layout.web_xml);
        }
        for listener in listeners {
            engine.add_listener(listener)?;
        }
        for filter in config.build_filter_objects(&props) {
            engine.add_filter(filter)?;
        }
        for kind in observers {
            engine.add_lifecycle_observer(build_observer(kind, layout));
        }
        if config.is_naming_enabled() {
            engine.enable_naming();
        }
        if let Some(route) = &config.route {
            engine.set_route(route);
        }

        self.register_deployments(&extraction)?;

        if let Some((port, command)) = config.shutdown_port() {
            engine.bind_control_port(port, command)?;
        }
        if config.use_shutdown_hook {
            self.install_shutdown_hook();
        }

        if let Err(e) = engine.start().await {
            if let Err(stop) = engine.stop().await {
                warn!(error = %stop, "Cleanup after failed start failed");
            }
            return Err(e.into());
        }
        info!("Server started");
        Ok(extraction)
    }

    fn register_deployments(&self, extraction: &Extraction) -> Result<()> {
        let mut deployments: Vec<DeploymentDescriptor> =
            self.config.deployments().into_iter().cloned().collect();
        if deployments.is_empty() {
            deployments.push(DeploymentDescriptor::at(""));
        }

        let resolver = ArtifactResolver::new(&extraction.artifacts, self.config.artifact_dir());
        for mut descriptor in deployments {
            descriptor.decrypt_secrets(self.password.as_deref())?;
            let artifact = resolver.resolve(&descriptor)?;

            let spec = DeploymentSpec {
                context_path: descriptor.context_path.clone(),
                artifact: artifact.path().to_path_buf(),
                parameters: descriptor.parameters().into_iter().cloned().collect(),
                environments: descriptor.environments().into_iter().cloned().collect(),
                resources: descriptor.resource_bindings()?,
            };
            let handle = self.engine.deploy(spec)?;
            self.strategy.on_deploy(&handle, &artifact);
            self.engine.observe_deployment(
                &handle,
                Arc::new(StrategyObserver {
                    strategy: self.strategy.clone(),
                    control: self.control.clone(),
                }),
            )?;
            self.engine
                .set_session_persistence(&handle, descriptor.session_persistence)?;
            if let Some(file) = self.context_file(&descriptor, &artifact) {
                self.engine.set_context_file(&handle, file)?;
            }
        }
        Ok(())
    }

    /// Configured context file, or the one embedded in the artifact.
    fn context_file(
        &self,
        descriptor: &DeploymentDescriptor,
        artifact: &ArtifactSource,
    ) -> Option<ContextFile> {
        if let Some(configured) = &descriptor.context_file {
            let path = if configured.is_absolute() {
                configured.clone()
            } else {
                self.config.artifact_dir().join(configured)
            };
            if path.is_file() {
                return Some(ContextFile::External(path));
            }
            warn!(path = %path.display(), "Context file not found");
            return None;
        }

        let archive = artifact.path();
        if !archive.is_file() {
            return None;
        }
        match read_archive_entry(archive, EMBEDDED_CONTEXT_FILE) {
            Ok(Some(contents)) => Some(ContextFile::Embedded {
                archive: archive.to_path_buf(),
                entry: EMBEDDED_CONTEXT_FILE.to_string(),
                contents,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(
                    artifact = %archive.display(),
                    error = %e,
                    "Cannot inspect artifact for a context file"
                );
                None
            }
        }
    }

    /// Stop the engine once the shutdown signal fires.
    fn install_shutdown_hook(&self) {
        let engine = Arc::downgrade(&self.engine);
        let signal = (self.shutdown_signal)();
        tokio::spawn(async move {
            if let Err(e) = signal.await {
                warn!(error = %e, "Cannot listen for termination signals");
                return;
            }
            info!("Termination signal received, stopping server");
            if let Some(engine) = engine.upgrade() {
                if let Err(e) = engine.stop().await {
                    warn!(error = %e, "Stop from shutdown hook failed");
                }
            }
        });
    }

    /// Block until termination, then stop the engine.
    ///
    /// Returns [`SupervisorError::DeploymentFailed`] when the await was
    /// released by a failed deployment.
    pub async fn wait(&self) -> Result<()> {
        self.engine.await_termination().await;
        self.engine.stop().await?;

        if let Some(context_path) = self.control.reason() {
            return Err(SupervisorError::DeploymentFailed { context_path });
        }
        info!("Server stopped");
        Ok(())
    }

    /// Stop the engine. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        self.engine.stop().await?;
        Ok(())
    }
}

fn derived_properties(props: &mut SystemProperties, layout: &WorkLayout) {
    let entries = [
        (WORK_DIR, &layout.root),
        (TEMP_DIR, &layout.temp),
        (LOG_DIR, &layout.logs),
        (LIBRARY_PATH, &layout.lib),
    ];
    for (name, path) in entries {
        props.set(name, path.display().to_string());
    }
}
