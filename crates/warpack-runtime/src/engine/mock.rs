// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock engine for testing.
//!
//! Records every call instead of serving anything. Deployments can be made
//! to fail on start to exercise the abort path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use super::traits::*;
use super::wait_until_set;
use crate::config::{FilterSpec, ListenerSpec};
use crate::extraction::WorkLayout;

/// A recorded engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    SetBaseDir(PathBuf),
    SetDefaultDescriptor(PathBuf),
    AddListener(ListenerSpec),
    AddFilter(&'static str),
    AddLifecycleObserver,
    EnableNaming,
    SetRoute(String),
    Deploy(DeploymentSpec),
    ObserveDeployment(DeploymentHandle),
    SetSessionPersistence(DeploymentHandle, bool),
    SetContextFile(DeploymentHandle, ContextFile),
    BindControlPort(u16, String),
    Start,
    Stop,
}

#[derive(Default)]
struct MockState {
    calls: Vec<EngineCall>,
    state: Option<LifecycleState>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    deployments: Vec<(DeploymentHandle, Vec<Arc<dyn LifecycleObserver>>)>,
    stop_pending: bool,
}

/// Mock engine for testing.
pub struct MockEngine {
    inner: Mutex<MockState>,
    terminate: watch::Sender<bool>,
    /// Context paths whose deployments fail on start.
    failing_contexts: HashSet<String>,
    /// If true, `start` returns an error.
    pub fail_start: bool,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create a mock engine where everything succeeds.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockState::default()),
            terminate: watch::channel(false).0,
            failing_contexts: HashSet::new(),
            fail_start: false,
        }
    }

    /// Create a mock engine where the deployment at `context_path` fails on start.
    pub fn failing_deployment(context_path: &str) -> Self {
        let mut engine = Self::new();
        engine.failing_contexts.insert(context_path.to_string());
        engine
    }

    /// Create a mock engine whose `start` fails.
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: EngineCall) {
        self.lock().calls.push(call);
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Registered deployments.
    pub fn deployed(&self) -> Vec<DeploymentSpec> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                EngineCall::Deploy(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    fn notify(observers: &[Arc<dyn LifecycleObserver>], event: LifecycleEvent) {
        for observer in observers {
            observer.on_event(&event);
        }
    }

    fn set_state(&self, state: LifecycleState) {
        let observers = {
            let mut inner = self.lock();
            inner.state = Some(state);
            inner.observers.clone()
        };
        Self::notify(
            &observers,
            LifecycleEvent {
                source: LifecycleSource::Server,
                state,
            },
        );
    }
}

#[async_trait]
impl ServerEngine for MockEngine {
    fn engine_type(&self) -> &'static str {
        "mock"
    }

    fn set_base_dir(&self, layout: &WorkLayout) {
        self.record(EngineCall::SetBaseDir(layout.root.clone()));
    }

    fn set_default_descriptor(&self, path: &Path) {
        self.record(EngineCall::SetDefaultDescriptor(path.to_path_buf()));
    }

    fn add_listener(&self, listener: ListenerSpec) -> Result<()> {
        self.record(EngineCall::AddListener(listener));
        Ok(())
    }

    fn add_filter(&self, filter: FilterSpec) -> Result<()> {
        self.record(EngineCall::AddFilter(filter.class_name()));
        Ok(())
    }

    fn add_lifecycle_observer(&self, observer: Arc<dyn LifecycleObserver>) {
        let mut inner = self.lock();
        inner.calls.push(EngineCall::AddLifecycleObserver);
        inner.observers.push(observer);
    }

    fn enable_naming(&self) {
        self.record(EngineCall::EnableNaming);
    }

    fn set_route(&self, route: &str) {
        self.record(EngineCall::SetRoute(route.to_string()));
    }

    fn deploy(&self, deployment: DeploymentSpec) -> Result<DeploymentHandle> {
        let mut inner = self.lock();
        let handle =
            DeploymentHandle::new(inner.deployments.len(), deployment.context_path.clone());
        inner.calls.push(EngineCall::Deploy(deployment));
        inner.deployments.push((handle.clone(), Vec::new()));
        Ok(handle)
    }

    fn observe_deployment(
        &self,
        handle: &DeploymentHandle,
        observer: Arc<dyn LifecycleObserver>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner
            .calls
            .push(EngineCall::ObserveDeployment(handle.clone()));
        let (_, observers) = inner
            .deployments
            .iter_mut()
            .find(|(h, _)| h == handle)
            .ok_or_else(|| EngineError::UnknownDeployment(handle.clone()))?;
        observers.push(observer);
        Ok(())
    }

    fn set_session_persistence(&self, handle: &DeploymentHandle, enabled: bool) -> Result<()> {
        self.record(EngineCall::SetSessionPersistence(handle.clone(), enabled));
        Ok(())
    }

    fn set_context_file(&self, handle: &DeploymentHandle, file: ContextFile) -> Result<()> {
        self.record(EngineCall::SetContextFile(handle.clone(), file));
        Ok(())
    }

    fn bind_control_port(&self, port: u16, command: &str) -> Result<()> {
        self.record(EngineCall::BindControlPort(port, command.to_string()));
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.record(EngineCall::Start);
        if self.fail_start {
            self.set_state(LifecycleState::Failed);
            return Err(EngineError::Other("mock start failure".to_string()));
        }
        self.set_state(LifecycleState::Starting);

        let deployments = self.lock().deployments.clone();
        for (handle, observers) in deployments {
            let state = if self.failing_contexts.contains(handle.context_path()) {
                LifecycleState::Failed
            } else {
                LifecycleState::Started
            };
            Self::notify(
                &observers,
                LifecycleEvent {
                    source: LifecycleSource::Deployment(handle),
                    state,
                },
            );
        }

        self.set_state(LifecycleState::Started);
        if self.lock().stop_pending {
            self.stop().await?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(EngineCall::Stop);
        {
            let mut inner = self.lock();
            let state = inner.state;
            match state {
                Some(LifecycleState::Started) | Some(LifecycleState::Failed) => {
                    inner.state = Some(LifecycleState::Stopping);
                }
                None | Some(LifecycleState::New) | Some(LifecycleState::Starting) => {
                    inner.stop_pending = true;
                    drop(inner);
                    self.abort_await();
                    return Ok(());
                }
                _ => return Ok(()),
            }
        }
        self.set_state(LifecycleState::Stopped);
        self.abort_await();
        Ok(())
    }

    async fn await_termination(&self) {
        wait_until_set(self.terminate.subscribe()).await;
    }

    fn abort_await(&self) {
        self.terminate.send_replace(true);
    }

    fn state(&self) -> LifecycleState {
        self.lock().state.unwrap_or(LifecycleState::New)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_deployment_notifies_observer() {
        struct Flag(Mutex<Vec<LifecycleState>>);
        impl LifecycleObserver for Flag {
            fn on_event(&self, event: &LifecycleEvent) {
                self.0.lock().unwrap().push(event.state);
            }
        }

        let engine = MockEngine::failing_deployment("/bad");
        let good = engine
            .deploy(DeploymentSpec {
                context_path: "/good".into(),
                ..DeploymentSpec::default()
            })
            .unwrap();
        let bad = engine
            .deploy(DeploymentSpec {
                context_path: "/bad".into(),
                ..DeploymentSpec::default()
            })
            .unwrap();

        let good_flag = Arc::new(Flag(Mutex::new(Vec::new())));
        let bad_flag = Arc::new(Flag(Mutex::new(Vec::new())));
        engine.observe_deployment(&good, good_flag.clone()).unwrap();
        engine.observe_deployment(&bad, bad_flag.clone()).unwrap();

        engine.start().await.unwrap();
        assert_eq!(*good_flag.0.lock().unwrap(), [LifecycleState::Started]);
        assert_eq!(*bad_flag.0.lock().unwrap(), [LifecycleState::Failed]);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let engine = MockEngine::new();
        engine.start().await.unwrap();
        engine.stop().await.unwrap();
        engine.stop().await.unwrap();

        assert_eq!(engine.state(), LifecycleState::Stopped);
        assert_eq!(engine.count(|c| *c == EngineCall::Stop), 2);
        engine.await_termination().await;
    }

    #[tokio::test]
    async fn test_stop_before_start_is_applied_after_start() {
        let engine = MockEngine::new();
        engine.stop().await.unwrap();
        assert_eq!(engine.state(), LifecycleState::New);
        engine.await_termination().await;

        engine.start().await.unwrap();

        assert_eq!(engine.state(), LifecycleState::Stopped);
        assert_eq!(engine.count(|c| *c == EngineCall::Stop), 2);
    }
}
