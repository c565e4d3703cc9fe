// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP engine.
//!
//! Serves each deployment's content under its context path with axum.
//! Archived artifacts are expanded into `<work>/expanded/` on start;
//! directory artifacts are served in place. Every listener runs its own
//! `axum::serve` task sharing one router.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::control::run_control_socket;
use super::traits::*;
use super::wait_until_set;
use crate::config::{FilterSpec, ListenerSpec};
use crate::extraction::{WorkLayout, expand_archive};

/// How long `stop` waits for in-flight requests.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

struct Deployment {
    handle: DeploymentHandle,
    spec: DeploymentSpec,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    session_persistence: bool,
    context_file: Option<ContextFile>,
    state: LifecycleState,
    content: Option<PathBuf>,
}

struct Inner {
    state: LifecycleState,
    layout: Option<WorkLayout>,
    default_descriptor: Option<PathBuf>,
    listeners: Vec<ListenerSpec>,
    filters: Vec<FilterSpec>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    naming: bool,
    route: Option<String>,
    deployments: Vec<Deployment>,
    control: Option<(u16, String)>,
    tasks: Vec<JoinHandle<()>>,
    bound: Vec<SocketAddr>,
    /// Stop requested before the server reached `Started`.
    stop_pending: bool,
}

/// Engine serving deployments over HTTP.
pub struct HttpEngine {
    inner: Mutex<Inner>,
    /// Set when `await_termination` should return.
    terminate: Arc<watch::Sender<bool>>,
    /// Set when listener and control tasks should exit.
    shutdown: watch::Sender<bool>,
}

impl Default for HttpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpEngine {
    /// Create an engine with nothing registered.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: LifecycleState::New,
                layout: None,
                default_descriptor: None,
                listeners: Vec::new(),
                filters: Vec::new(),
                observers: Vec::new(),
                naming: false,
                route: None,
                deployments: Vec::new(),
                control: None,
                tasks: Vec::new(),
                bound: Vec::new(),
                stop_pending: false,
            }),
            terminate: Arc::new(watch::channel(false).0),
            shutdown: watch::channel(false).0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Addresses the listeners are bound to, in registration order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.lock().bound.clone()
    }

    fn require_new(inner: &Inner, operation: &'static str) -> Result<()> {
        if inner.state != LifecycleState::New {
            return Err(EngineError::InvalidState {
                operation,
                state: inner.state,
            });
        }
        Ok(())
    }

    fn with_deployment<T>(
        &self,
        handle: &DeploymentHandle,
        f: impl FnOnce(&mut Deployment) -> T,
    ) -> Result<T> {
        let mut inner = self.lock();
        inner
            .deployments
            .iter_mut()
            .find(|d| &d.handle == handle)
            .map(f)
            .ok_or_else(|| EngineError::UnknownDeployment(handle.clone()))
    }

    fn transition_server(&self, state: LifecycleState) {
        let observers = {
            let mut inner = self.lock();
            inner.state = state;
            inner.observers.clone()
        };
        let event = LifecycleEvent {
            source: LifecycleSource::Server,
            state,
        };
        for observer in observers {
            observer.on_event(&event);
        }
    }

    fn transition_deployment(&self, handle: &DeploymentHandle, state: LifecycleState) {
        let observers = self
            .with_deployment(handle, |d| {
                d.state = state;
                d.observers.clone()
            })
            .unwrap_or_default();
        let event = LifecycleEvent {
            source: LifecycleSource::Deployment(handle.clone()),
            state,
        };
        for observer in observers {
            observer.on_event(&event);
        }
    }

    /// Expand or locate the content of every deployment.
    async fn start_deployments(&self, layout: &WorkLayout) -> Vec<(String, PathBuf)> {
        let pending: Vec<(DeploymentHandle, PathBuf)> = self
            .lock()
            .deployments
            .iter()
            .map(|d| (d.handle.clone(), d.spec.artifact.clone()))
            .collect();

        let mut mounts = Vec::new();
        for (handle, artifact) in pending {
            self.transition_deployment(&handle, LifecycleState::Starting);

            let target = layout.expanded().join(expanded_name(&handle, &artifact));
            let prepared =
                tokio::task::spawn_blocking(move || prepare_content(&artifact, &target)).await;

            match prepared {
                Ok(Ok(content)) => {
                    let _ = self.with_deployment(&handle, |d| d.content = Some(content.clone()));
                    info!(deployment = %handle, content = %content.display(), "Deployment ready");
                    mounts.push((handle.context_path().to_string(), content));
                    self.transition_deployment(&handle, LifecycleState::Started);
                }
                Ok(Err(e)) => {
                    error!(deployment = %handle, error = %e, "Deployment failed");
                    self.transition_deployment(&handle, LifecycleState::Failed);
                }
                Err(e) => {
                    error!(deployment = %handle, error = %e, "Deployment task failed");
                    self.transition_deployment(&handle, LifecycleState::Failed);
                }
            }
        }
        mounts
    }

    fn log_settings(&self) {
        let inner = self.lock();
        if let Some(descriptor) = &inner.default_descriptor {
            debug!(path = %descriptor.display(), "Default deployment descriptor");
        }
        if let Some(route) = &inner.route {
            info!(route = %route, "Session route configured");
        }
        if inner.naming {
            let resources: usize = inner.deployments.iter().map(|d| d.spec.resources.len()).sum();
            let environments: usize = inner
                .deployments
                .iter()
                .map(|d| d.spec.environments.len())
                .sum();
            info!(resources, environments, "Naming enabled");
        }
        for d in &inner.deployments {
            debug!(
                deployment = %d.handle,
                session_persistence = d.session_persistence,
                context_file = d.context_file.is_some(),
                content = ?d.content,
                parameters = d.spec.parameters.len(),
                "Deployment settings"
            );
        }
    }

    async fn bind_listeners(&self, router: Router) -> Result<()> {
        let listeners = self.lock().listeners.clone();

        for spec in listeners {
            let addr = spec.socket_addr();
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| EngineError::Bind { addr, source })?;
            let local = listener.local_addr()?;
            info!(addr = %local, protocol = %spec.protocol, "Listener bound");

            let app = with_listener_limits(router.clone(), &spec);
            let shutdown = self.shutdown.subscribe();
            let task = tokio::spawn(async move {
                let served = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(wait_until_set(shutdown))
                .await;
                if let Err(e) = served {
                    error!(addr = %local, error = %e, "Listener failed");
                }
            });

            let mut inner = self.lock();
            inner.bound.push(local);
            inner.tasks.push(task);
        }
        Ok(())
    }

    async fn bind_control(&self) -> Result<()> {
        let Some((port, command)) = self.lock().control.clone() else {
            return Ok(());
        };

        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| EngineError::Bind { addr, source })?;
        info!(addr = %addr, "Control port bound");

        let terminate = self.terminate.clone();
        let shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            if run_control_socket(listener, command, shutdown).await {
                terminate.send_replace(true);
            }
        });
        self.lock().tasks.push(task);
        Ok(())
    }
}

fn expanded_name(handle: &DeploymentHandle, artifact: &Path) -> String {
    let stem = artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string());
    format!("{}-{stem}", handle.id())
}

fn prepare_content(artifact: &Path, target: &Path) -> Result<PathBuf> {
    if artifact.is_dir() {
        return Ok(artifact.to_path_buf());
    }
    expand_archive(artifact, target)?;
    Ok(target.to_path_buf())
}

/// Normalised mount path: empty for root, otherwise `/a/b`.
pub fn mount_path(context_path: &str) -> String {
    let trimmed = context_path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Router serving `mounts` (context path, content directory) through `filters`.
pub fn build_router(mounts: &[(String, PathBuf)], filters: Vec<FilterSpec>) -> Router {
    let mut router = Router::new();
    for (context_path, content) in mounts {
        let service = ServeDir::new(content);
        let path = mount_path(context_path);
        router = if path.is_empty() {
            router.fallback_service(service)
        } else {
            router.nest_service(&path, service)
        };
    }

    router
        .layer(middleware::from_fn_with_state(Arc::new(filters), apply_filters))
        .layer(TraceLayer::new_for_http())
}

async fn apply_filters(
    State(filters): State<Arc<Vec<FilterSpec>>>,
    request: Request,
    next: Next,
) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_default();

    for filter in filters.iter() {
        if let FilterSpec::RemoteAddr(f) = filter {
            if !f.permits(&remote) {
                debug!(remote = %remote, "Request denied by address filter");
                return StatusCode::from_u16(f.deny_status)
                    .unwrap_or(StatusCode::FORBIDDEN)
                    .into_response();
            }
        }
    }

    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let mut response = next.run(request).await;

    for filter in filters.iter() {
        match filter {
            FilterSpec::ResponseHeader(f) => {
                let header = HeaderName::from_str(&f.name)
                    .ok()
                    .zip(HeaderValue::from_str(&f.value).ok());
                if let Some((name, value)) = header {
                    response.headers_mut().insert(name, value);
                }
            }
            FilterSpec::AccessLog(f) if f.enabled => {
                info!(
                    target: "warpack_runtime::access",
                    prefix = %f.prefix,
                    remote = %remote,
                    method = %method,
                    uri = %uri,
                    status = response.status().as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request"
                );
            }
            _ => {}
        }
    }
    response
}

#[derive(Clone)]
struct ListenerLimits {
    permits: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
}

fn with_listener_limits(router: Router, spec: &ListenerSpec) -> Router {
    if spec.max_connections.is_none() && spec.connection_timeout.is_none() {
        return router;
    }
    let limits = ListenerLimits {
        permits: spec.max_connections.map(|n| Arc::new(Semaphore::new(n))),
        timeout: spec.connection_timeout,
    };
    router.layer(middleware::from_fn_with_state(limits, enforce_limits))
}

async fn enforce_limits(
    State(limits): State<ListenerLimits>,
    request: Request,
    next: Next,
) -> Response {
    let _permit = match &limits.permits {
        Some(permits) => match permits.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
        },
        None => None,
    };

    match limits.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, next.run(request)).await {
            Ok(response) => response,
            Err(_) => StatusCode::REQUEST_TIMEOUT.into_response(),
        },
        None => next.run(request).await,
    }
}

#[async_trait]
impl ServerEngine for HttpEngine {
    fn engine_type(&self) -> &'static str {
        "http"
    }

    fn set_base_dir(&self, layout: &WorkLayout) {
        self.lock().layout = Some(layout.clone());
    }

    fn set_default_descriptor(&self, path: &Path) {
        self.lock().default_descriptor = Some(path.to_path_buf());
    }

    fn add_listener(&self, listener: ListenerSpec) -> Result<()> {
        let mut inner = self.lock();
        Self::require_new(&inner, "add listener")?;
        inner.listeners.push(listener);
        Ok(())
    }

    fn add_filter(&self, filter: FilterSpec) -> Result<()> {
        let mut inner = self.lock();
        Self::require_new(&inner, "add filter")?;
        inner.filters.push(filter);
        Ok(())
    }

    fn add_lifecycle_observer(&self, observer: Arc<dyn LifecycleObserver>) {
        self.lock().observers.push(observer);
    }

    fn enable_naming(&self) {
        self.lock().naming = true;
    }

    fn set_route(&self, route: &str) {
        self.lock().route = Some(route.to_string());
    }

    fn deploy(&self, deployment: DeploymentSpec) -> Result<DeploymentHandle> {
        let mut inner = self.lock();
        Self::require_new(&inner, "deploy")?;
        let handle = DeploymentHandle::new(
            inner.deployments.len(),
            mount_path(&deployment.context_path),
        );
        inner.deployments.push(Deployment {
            handle: handle.clone(),
            spec: deployment,
            observers: Vec::new(),
            session_persistence: false,
            context_file: None,
            state: LifecycleState::New,
            content: None,
        });
        Ok(handle)
    }

    fn observe_deployment(
        &self,
        handle: &DeploymentHandle,
        observer: Arc<dyn LifecycleObserver>,
    ) -> Result<()> {
        self.with_deployment(handle, |d| d.observers.push(observer))
    }

    fn set_session_persistence(&self, handle: &DeploymentHandle, enabled: bool) -> Result<()> {
        self.with_deployment(handle, |d| d.session_persistence = enabled)
    }

    fn set_context_file(&self, handle: &DeploymentHandle, file: ContextFile) -> Result<()> {
        self.with_deployment(handle, |d| d.context_file = Some(file))
    }

    fn bind_control_port(&self, port: u16, command: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::require_new(&inner, "bind control port")?;
        inner.control = Some((port, command.to_string()));
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let layout = {
            let inner = self.lock();
            Self::require_new(&inner, "start")?;
            inner.layout.clone().ok_or(EngineError::NoBaseDir)?
        };
        self.transition_server(LifecycleState::Starting);

        let mounts = self.start_deployments(&layout).await;
        self.log_settings();
        let filters = self.lock().filters.clone();
        let router = build_router(&mounts, filters);

        let bound = match self.bind_listeners(router).await {
            Ok(()) => self.bind_control().await,
            Err(e) => Err(e),
        };
        if let Err(e) = bound {
            self.transition_server(LifecycleState::Failed);
            return Err(e);
        }

        self.transition_server(LifecycleState::Started);
        if self.lock().stop_pending {
            info!("Stop requested during startup, stopping server");
            self.stop().await?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let tasks = {
            let mut inner = self.lock();
            let state = inner.state;
            match state {
                LifecycleState::Started | LifecycleState::Failed => {}
                LifecycleState::New | LifecycleState::Starting => {
                    inner.stop_pending = true;
                    drop(inner);
                    self.abort_await();
                    return Ok(());
                }
                LifecycleState::Stopping | LifecycleState::Stopped => return Ok(()),
            }
            inner.state = LifecycleState::Stopping;
            std::mem::take(&mut inner.tasks)
        };
        self.transition_server(LifecycleState::Stopping);

        self.shutdown.send_replace(true);
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, task).await.is_err() {
                warn!("Listener did not stop in time, aborting");
                abort.abort();
            }
        }

        let started: Vec<DeploymentHandle> = self
            .lock()
            .deployments
            .iter()
            .filter(|d| d.state == LifecycleState::Started)
            .map(|d| d.handle.clone())
            .collect();
        for handle in started {
            self.transition_deployment(&handle, LifecycleState::Stopping);
            self.transition_deployment(&handle, LifecycleState::Stopped);
        }

        self.transition_server(LifecycleState::Stopped);
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
        self.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RemoteAddrFilter, ResponseHeaderFilter};
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn site(dir: &Path, name: &str, body: &str) -> PathBuf {
        let root = dir.join(name);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("index.html"), body).unwrap();
        root
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_mount_path() {
        assert_eq!(mount_path(""), "");
        assert_eq!(mount_path("/"), "");
        assert_eq!(mount_path("shop"), "/shop");
        assert_eq!(mount_path("/shop/"), "/shop");
    }

    #[tokio::test]
    async fn test_router_serves_context_paths() {
        let tmp = TempDir::new().unwrap();
        let shop = site(tmp.path(), "shop", "shop home");
        let root = site(tmp.path(), "root", "root home");
        let router = build_router(
            &[("/shop".to_string(), shop), (String::new(), root)],
            Vec::new(),
        );

        let response = router.clone().oneshot(get("/shop/index.html")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "shop home");

        let response = router.oneshot(get("/index.html")).await.unwrap();
        assert_eq!(body_text(response).await, "root home");
    }

    #[tokio::test]
    async fn test_response_header_filter() {
        let tmp = TempDir::new().unwrap();
        let root = site(tmp.path(), "root", "x");
        let filters = vec![FilterSpec::ResponseHeader(ResponseHeaderFilter {
            name: "X-Served-By".to_string(),
            value: "warpack".to_string(),
        })];
        let router = build_router(&[(String::new(), root)], filters);

        let response = router.oneshot(get("/index.html")).await.unwrap();
        assert_eq!(response.headers()["x-served-by"], "warpack");
    }

    #[tokio::test]
    async fn test_remote_addr_filter_denies() {
        let tmp = TempDir::new().unwrap();
        let root = site(tmp.path(), "root", "x");
        let filter = RemoteAddrFilter {
            allow: Some(regex::Regex::new(r"^(?:10\.0\.0\.\d+)$").unwrap()),
            ..RemoteAddrFilter::default()
        };
        let router = build_router(&[(String::new(), root)], vec![FilterSpec::RemoteAddr(filter)]);

        let mut denied = get("/index.html");
        denied
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 5], 4000))));
        let response = router.clone().oneshot(denied).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let mut allowed = get("/index.html");
        allowed
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4000))));
        let response = router.oneshot(allowed).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    struct Counter(AtomicUsize, LifecycleState);

    impl LifecycleObserver for Counter {
        fn on_event(&self, event: &LifecycleEvent) {
            if event.state == self.1 {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn local_listener() -> ListenerSpec {
        let mut spec = ListenerSpec::for_protocol("HTTP/1.1").unwrap();
        spec.set_property("address", "127.0.0.1").unwrap();
        spec.set_property("port", "0").unwrap();
        spec
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let content = site(tmp.path(), "app", "hello");
        let engine = HttpEngine::new();
        engine.set_base_dir(&WorkLayout::new(tmp.path().join("work")));
        engine.add_listener(local_listener()).unwrap();

        let stopped = Arc::new(Counter(AtomicUsize::new(0), LifecycleState::Stopped));
        engine.add_lifecycle_observer(stopped.clone());
        let handle = engine
            .deploy(DeploymentSpec {
                context_path: "/app".to_string(),
                artifact: content,
                ..DeploymentSpec::default()
            })
            .unwrap();
        assert_eq!(handle.context_path(), "/app");

        engine.start().await.unwrap();
        assert_eq!(engine.state(), LifecycleState::Started);
        assert_eq!(engine.local_addrs().len(), 1);
        assert!(engine.add_listener(local_listener()).is_err());

        engine.stop().await.unwrap();
        engine.stop().await.unwrap();
        assert_eq!(engine.state(), LifecycleState::Stopped);
        assert_eq!(stopped.0.load(Ordering::SeqCst), 1);

        // stop releases waiters
        engine.await_termination().await;
    }

    #[tokio::test]
    async fn test_concurrent_stops_stop_once() {
        let tmp = TempDir::new().unwrap();
        let engine = HttpEngine::new();
        engine.set_base_dir(&WorkLayout::new(tmp.path().join("work")));
        engine.add_listener(local_listener()).unwrap();
        let stopped = Arc::new(Counter(AtomicUsize::new(0), LifecycleState::Stopped));
        engine.add_lifecycle_observer(stopped.clone());
        engine.start().await.unwrap();

        let (first, second) = tokio::join!(engine.stop(), engine.stop());
        first.unwrap();
        second.unwrap();

        assert_eq!(engine.state(), LifecycleState::Stopped);
        assert_eq!(stopped.0.load(Ordering::SeqCst), 1);
        tokio::time::timeout(Duration::from_secs(5), engine.await_termination())
            .await
            .expect("await_termination was not released");
    }

    /// Holds a deployment in `Starting` until released.
    struct Gate {
        entered: std::sync::mpsc::Sender<()>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl LifecycleObserver for Gate {
        fn on_event(&self, event: &LifecycleEvent) {
            if event.state == LifecycleState::Starting {
                let _ = self.entered.send(());
                let _ = self.release.lock().unwrap().recv();
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_during_startup_is_applied() {
        let tmp = TempDir::new().unwrap();
        let content = site(tmp.path(), "app", "hello");
        let engine = Arc::new(HttpEngine::new());
        engine.set_base_dir(&WorkLayout::new(tmp.path().join("work")));
        engine.add_listener(local_listener()).unwrap();
        let handle = engine
            .deploy(DeploymentSpec {
                context_path: "/app".to_string(),
                artifact: content,
                ..DeploymentSpec::default()
            })
            .unwrap();

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let gate = Gate {
            entered: entered_tx,
            release: Mutex::new(release_rx),
        };
        engine.observe_deployment(&handle, Arc::new(gate)).unwrap();
        let stopped = Arc::new(Counter(AtomicUsize::new(0), LifecycleState::Stopped));
        engine.add_lifecycle_observer(stopped.clone());

        let starting = tokio::spawn({
            let engine = engine.clone();
            async move { engine.start().await }
        });
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(engine.state(), LifecycleState::Starting);

        engine.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), engine.await_termination())
            .await
            .expect("await_termination was not released");

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(10), starting)
            .await
            .expect("start did not return")
            .unwrap()
            .unwrap();

        assert_eq!(engine.state(), LifecycleState::Stopped);
        assert_eq!(stopped.0.load(Ordering::SeqCst), 1);
        let addr = engine.local_addrs()[0];
        std::net::TcpListener::bind(addr).unwrap();
    }

    #[tokio::test]
    async fn test_declared_protocol_is_advisory() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let tmp = TempDir::new().unwrap();
        let content = site(tmp.path(), "app", "hello");
        let engine = HttpEngine::new();
        engine.set_base_dir(&WorkLayout::new(tmp.path().join("work")));
        let mut spec = ListenerSpec::for_protocol("HTTP/2").unwrap();
        spec.set_property("address", "127.0.0.1").unwrap();
        spec.set_property("port", "0").unwrap();
        engine.add_listener(spec).unwrap();
        engine
            .deploy(DeploymentSpec {
                context_path: "/app".to_string(),
                artifact: content,
                ..DeploymentSpec::default()
            })
            .unwrap();
        engine.start().await.unwrap();

        let mut stream = tokio::net::TcpStream::connect(engine.local_addrs()[0])
            .await
            .unwrap();
        let request = "GET /app/index.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("hello"), "{response}");

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_deployment_is_reported() {
        let tmp = TempDir::new().unwrap();
        let engine = HttpEngine::new();
        engine.set_base_dir(&WorkLayout::new(tmp.path().join("work")));

        let broken = tmp.path().join("broken.war");
        std::fs::write(&broken, "not a zip").unwrap();
        let handle = engine
            .deploy(DeploymentSpec {
                artifact: broken,
                ..DeploymentSpec::default()
            })
            .unwrap();
        let failed = Arc::new(Counter(AtomicUsize::new(0), LifecycleState::Failed));
        engine.observe_deployment(&handle, failed.clone()).unwrap();

        engine.start().await.unwrap();
        assert_eq!(failed.0.load(Ordering::SeqCst), 1);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_requires_base_dir() {
        let engine = HttpEngine::new();
        assert!(matches!(engine.start().await, Err(EngineError::NoBaseDir)));
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let engine = HttpEngine::new();
        let handle = DeploymentHandle::new(3, "/x");
        assert!(matches!(
            engine.set_session_persistence(&handle, true),
            Err(EngineError::UnknownDeployment(_))
        ));
    }
}
