// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server engine abstraction.
//!
//! The supervisor talks to the embedded server through the [`ServerEngine`]
//! trait. [`HttpEngine`] serves deployments over HTTP with axum;
//! [`MockEngine`] records calls for tests.

pub mod control;
pub mod http;
pub mod mock;
pub mod observers;
pub mod traits;

pub use http::HttpEngine;
pub use mock::{EngineCall, MockEngine};
pub use observers::{LifecycleLogObserver, PidFileObserver, build_observer};
pub use traits::*;

use tokio::sync::watch;

/// Resolve once `flag` is set, or its sender is gone.
pub(crate) async fn wait_until_set(mut flag: watch::Receiver<bool>) {
    let _ = flag.wait_for(|set| *set).await;
}
