// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! warpack runtime - self-contained web archive launcher
//!
//! A warpack executable carries its web artifacts in an appended zip
//! archive. At startup the runtime brings a working directory up to date with
//! that archive, reads `config.yaml` from next to the executable and runs the
//! artifacts on an embedded HTTP engine until told to stop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         warpack (binary)                             │
//! │           start │ stop │ checkConfig │ obfuscate                     │
//! └──────────────────────────────────────────────────────────────────────┘
//!        │                  │                              │
//!        │ load             │ send command                 │ OBF / ENC
//!        ▼                  ▼                              ▼
//! ┌───────────────┐   ┌──────────────┐              ┌──────────────┐
//! │ Configuration │   │   shutdown   │              │ secret codec │
//! │ (config.yaml) │   └──────┬───────┘              └──────────────┘
//! └───────┬───────┘          │ TCP localhost:<port>
//!         ▼                  │
//! ┌──────────────────────────┼───────────────────────────────────────────┐
//! │ Supervisor               │                                           │
//! │  ┌────────────┐  ┌───────┴──────┐  ┌─────────────┐  ┌─────────────┐  │
//! │  │ Extraction │─▶│  Preflight   │─▶│  Artifact   │─▶│   Engine    │  │
//! │  │   cache    │  │  port probe  │  │  resolver   │  │ registration│  │
//! │  └────────────┘  └──────────────┘  └─────────────┘  └─────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ ServerEngine: HttpEngine (axum) / MockEngine                          │
//! │   listeners │ filters │ deployments │ control socket │ observers      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Working directory
//!
//! | Path | Content |
//! |------|---------|
//! | `webapps/` | Artifacts (`*.war`) from the archive root |
//! | `extra/` | Extra resources |
//! | `lib/` | Native libraries for this platform |
//! | `expanded/` | Deployments unpacked by the HTTP engine |
//! | `temp/`, `logs/` | Scratch and log space |
//! | `web.xml`, `logging.properties` | Copied from `conf/` |
//! | `BUILD_TIMESTAMP` | Written last; marks the cache valid |
//!
//! # Environment
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `WARPACK_ARCHIVE` | running executable | Archive carrying the artifacts |
//! | `RUST_LOG` | `warpack_runtime=info` | Log filter, overrides `silent` |

/// Command line surface.
pub mod cli;

/// Sub-command implementations.
pub mod commands;

/// Configuration document and the objects built from it.
pub mod config;

/// Server engine abstraction and implementations.
pub mod engine;

/// Error types for runtime operations.
pub mod error;

/// Working directory extraction cache.
pub mod extraction;

/// Deployment to artifact resolution.
pub mod resolver;

/// Protection of configuration values.
pub mod secret;

/// Remote shutdown client.
pub mod shutdown;

/// Process termination signals.
pub mod signals;

/// Startup, await and shutdown of the engine.
pub mod supervisor;

/// Logging setup.
pub mod telemetry;

pub use config::Configuration;
pub use error::{Error, Result};
pub use supervisor::Supervisor;
