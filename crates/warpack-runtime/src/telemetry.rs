// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Logging setup.
//!
//! The subscriber is installed before the configuration is read, so its
//! filter sits behind a reload layer. `silent` and the archive's
//! `logging.properties` adjust it later. `RUST_LOG`, when set, is never
//! overridden.

use std::path::Path;

use tracing::warn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "warpack_runtime=info";

/// Filter used when the configuration asks for silence.
pub const SILENT_DIRECTIVE: &str = "warn";

/// Handle for adjusting the installed log filter.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

/// Install the global subscriber.
pub fn init() -> LogHandle {
    let from_env = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_DIRECTIVE.into());
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    LogHandle { handle, from_env }
}

/// Filter directives from a `logging.properties` document: one per line,
/// blank lines and `#` comments skipped.
pub fn logging_directives(contents: &str) -> Option<String> {
    let directives: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    (!directives.is_empty()).then(|| directives.join(","))
}

impl LogHandle {
    /// Rebuild the filter from the configuration's `silent` flag and an
    /// optional logging document.
    pub fn configure(&self, silent: bool, logging_file: Option<&Path>) {
        if self.from_env {
            return;
        }

        let mut directives = if silent { SILENT_DIRECTIVE } else { DEFAULT_DIRECTIVE }.to_string();
        if let Some(path) = logging_file.filter(|p| p.is_file()) {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    if let Some(extra) = logging_directives(&contents) {
                        directives.push(',');
                        directives.push_str(&extra);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read logging configuration")
                }
            }
        }

        let filter = match EnvFilter::try_new(&directives) {
            Ok(filter) => filter,
            Err(e) => {
                warn!(directives = %directives, error = %e, "Invalid logging directives ignored");
                return;
            }
        };
        if let Err(e) = self.handle.reload(filter) {
            warn!(error = %e, "Cannot update log filter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (reload::Layer<EnvFilter, Registry>, LogHandle) {
        let (layer, handle) = reload::Layer::new(EnvFilter::new(DEFAULT_DIRECTIVE));
        (
            layer,
            LogHandle {
                handle,
                from_env: false,
            },
        )
    }

    fn current(log: &LogHandle) -> String {
        log.handle
            .with_current(|f| f.to_string().to_lowercase())
            .unwrap()
    }

    #[test]
    fn test_logging_directives() {
        let doc = "# levels\n\nwarpack_runtime=debug\n  tower_http=trace  \n";
        assert_eq!(
            logging_directives(doc).as_deref(),
            Some("warpack_runtime=debug,tower_http=trace")
        );
        assert_eq!(logging_directives("# nothing\n"), None);
    }

    #[test]
    fn test_silent_lowers_default() {
        let (_layer, log) = handle();
        log.configure(true, None);
        assert_eq!(current(&log), "warn");
    }

    #[test]
    fn test_logging_file_appended() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logging.properties");
        std::fs::write(&path, "tower_http=debug\n").unwrap();

        let (_layer, log) = handle();
        log.configure(false, Some(&path));
        let filter = current(&log);
        assert!(filter.contains("tower_http=debug"), "{filter}");
        assert!(filter.contains("warpack_runtime=info"), "{filter}");
    }

    #[test]
    fn test_rust_log_wins() {
        let (_layer, mut log) = handle();
        log.from_env = true;
        log.configure(true, None);
        assert_eq!(current(&log), DEFAULT_DIRECTIVE);
    }
}
