// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests: HTTP engine behind the supervisor, stopped through the
//! control port or the shutdown hook.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{TestArchive, free_port, war};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use warpack_runtime::engine::{HttpEngine, LifecycleState, ServerEngine};
use warpack_runtime::shutdown;
use warpack_runtime::supervisor::Supervisor;

async fn wait_for_state(engine: &HttpEngine, state: LifecycleState) {
    for _ in 0..250 {
        if engine.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("engine never reached {state}, still {}", engine.state());
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_serves_until_shutdown_command() {
    let archive = TestArchive::with_artifacts(&[(
        "shop.war",
        war(&[("index.html", "hello from shop")]),
    )]);
    let port = free_port();
    let control = free_port();
    let config = archive.config(&format!(
        r#"
listener:
  address: 127.0.0.1
  port: {port}
shutdown:
  port: {control}
  command: STOPNOW
filter:
  className: ResponseHeaderFilter
  name: X-Powered-By
  value: warpack
deployment:
  contextPath: /shop
"#
    ));
    let stop_config = config.clone();

    let engine = Arc::new(HttpEngine::new());
    let supervisor = Supervisor::builder()
        .config(config)
        .engine(engine.clone())
        .archive(&archive.archive)
        .build()
        .unwrap();
    let running = tokio::spawn(async move { supervisor.run().await });

    wait_for_state(&engine, LifecycleState::Started).await;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    assert_eq!(engine.local_addrs(), [addr]);

    let response = http_get(addr, "/shop/index.html").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.to_lowercase().contains("x-powered-by: warpack"), "{response}");
    assert!(response.ends_with("hello from shop"), "{response}");

    // A wrong command is ignored.
    shutdown::send_shutdown(control, "NOPE").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.state(), LifecycleState::Started);
    assert!(!running.is_finished());

    assert!(shutdown::stop(&stop_config).await.unwrap());
    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(engine.state(), LifecycleState::Stopped);

    // Listener and control port are released.
    std::net::TcpListener::bind(addr).unwrap();
    std::net::TcpListener::bind(("127.0.0.1", control)).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broken_artifact_stops_server() {
    let archive = TestArchive::with_artifacts(&[("broken.war", b"not a zip".to_vec())]);
    let config = archive.config(&format!(
        "listener: {{ address: 127.0.0.1, port: {} }}\n",
        free_port()
    ));

    let engine = Arc::new(HttpEngine::new());
    let supervisor = Supervisor::builder()
        .config(config)
        .engine(engine.clone())
        .archive(&archive.archive)
        .build()
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), supervisor.run())
        .await
        .expect("run did not return");

    assert!(result.is_err());
    assert_eq!(engine.state(), LifecycleState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_signal_during_startup_stops_server() {
    let archive = TestArchive::with_artifacts(&[(
        "shop.war",
        war(&[("index.html", "hello from shop")]),
    )]);
    let port = free_port();
    let config = archive.config(&format!(
        "useShutdownHook: true\nlistener: {{ address: 127.0.0.1, port: {port} }}\n"
    ));

    let engine = Arc::new(HttpEngine::new());
    let supervisor = Supervisor::builder()
        .config(config)
        .engine(engine.clone())
        .archive(&archive.archive)
        .shutdown_signal(|| async { Ok(()) })
        .build()
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), supervisor.run())
        .await
        .expect("run did not return")
        .unwrap();

    assert_eq!(engine.state(), LifecycleState::Stopped);
    std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
}
