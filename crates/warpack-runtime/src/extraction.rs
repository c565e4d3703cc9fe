// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Extraction cache manager.
//!
//! The archive carries a `BUILD_TIMESTAMP` marker (decimal epoch millis).
//! A copy of the marker is written into the working directory after every
//! successful extraction. On the next start the two are compared
//! numerically and the working directory is reused unless the archive is
//! strictly newer.
//!
//! ```text
//! <work>/
//! ├── BUILD_TIMESTAMP      # written last
//! ├── web.xml              # conf/web.xml
//! ├── logging.properties   # conf/logging.properties
//! ├── temp/
//! ├── logs/
//! ├── webapps/             # *.war from the archive root
//! ├── extra/               # extra/** from the archive
//! └── lib/                 # native/<os>-<arch>/**
//! ```

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};
use zip::ZipArchive;

/// Marker file name, both in the archive and in the working directory.
pub const MARKER_FILE: &str = "BUILD_TIMESTAMP";
/// Default deployment descriptor in the archive.
pub const ARCHIVE_WEB_XML: &str = "conf/web.xml";
/// Logging configuration in the archive.
pub const ARCHIVE_LOGGING: &str = "conf/logging.properties";
/// Prefix of extra resources in the archive.
pub const ARCHIVE_EXTRA_PREFIX: &str = "extra/";
/// Prefix of native libraries in the archive.
pub const ARCHIVE_NATIVE_PREFIX: &str = "native/";
/// Extension of deployable artifacts.
pub const ARTIFACT_EXTENSION: &str = "war";

/// Errors from extraction.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExtractionError {
    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The archive could not be read.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The archive carries no build marker.
    #[error("archive {0} has no {MARKER_FILE} entry")]
    MissingMarker(PathBuf),

    /// The archive's build marker is not a number.
    #[error("invalid build timestamp '{0}'")]
    InvalidMarker(String),

    /// An archive entry would be written outside the working directory.
    #[error("archive entry '{0}' escapes the extraction directory")]
    UnsafeEntry(String),
}

/// Result type for extraction.
pub type Result<T> = std::result::Result<T, ExtractionError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ExtractionError + '_ {
    move |source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Why the working directory has to be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshReason {
    /// Working directory does not exist.
    Absent,
    /// Caller forced a clean extraction.
    Clean,
    /// Marker missing or unreadable.
    NoMarker,
    /// Archive is newer than the cached extraction.
    Outdated {
        /// Timestamp in the archive.
        artifact: u64,
        /// Timestamp in the working directory.
        cached: u64,
    },
}

/// Extraction cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// The working directory must be rebuilt.
    Fresh(FreshReason),
    /// The working directory is up to date.
    Cached,
}

impl CacheState {
    /// Decide the cache state.
    ///
    /// Only a strictly greater archive timestamp invalidates an existing
    /// marker; equal or older archives reuse the working directory.
    pub fn decide(work_dir_exists: bool, clean: bool, cached: Option<u64>, artifact: u64) -> Self {
        if !work_dir_exists {
            return Self::Fresh(FreshReason::Absent);
        }
        if clean {
            return Self::Fresh(FreshReason::Clean);
        }
        match cached {
            None => Self::Fresh(FreshReason::NoMarker),
            Some(cached) if artifact > cached => {
                Self::Fresh(FreshReason::Outdated { artifact, cached })
            }
            Some(_) => Self::Cached,
        }
    }

    /// Whether extraction is needed.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Paths inside the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkLayout {
    pub root: PathBuf,
    pub temp: PathBuf,
    pub logs: PathBuf,
    pub apps: PathBuf,
    pub extra: PathBuf,
    pub lib: PathBuf,
    pub web_xml: PathBuf,
    pub logging: PathBuf,
    pub marker: PathBuf,
}

impl WorkLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            temp: root.join("temp"),
            logs: root.join("logs"),
            apps: root.join("webapps"),
            extra: root.join("extra"),
            lib: root.join("lib"),
            web_xml: root.join("web.xml"),
            logging: root.join("logging.properties"),
            marker: root.join(MARKER_FILE),
            root,
        }
    }

    /// Directory where archived artifacts are expanded for serving.
    pub fn expanded(&self) -> PathBuf {
        self.root.join("expanded")
    }

    /// Pid file written by the pid-file observer.
    pub fn pid_file(&self) -> PathBuf {
        self.root.join("warpack.pid")
    }

    fn directories(&self) -> [&Path; 5] {
        [&self.temp, &self.logs, &self.apps, &self.extra, &self.lib]
    }
}

/// Result of [`ExtractionManager::prepare`].
#[derive(Debug, Clone)]
pub struct Extraction {
    pub layout: WorkLayout,
    /// Whether the working directory was rebuilt.
    pub extracted: bool,
    /// Build timestamp of the archive.
    pub build_timestamp: u64,
    /// Deployable artifacts in the working directory, sorted.
    pub artifacts: Vec<PathBuf>,
}

/// Platform directory name for native libraries, e.g. `linux-x86_64`.
pub fn native_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Decides whether the working directory is stale and rebuilds it.
#[derive(Debug, Clone)]
pub struct ExtractionManager {
    archive: PathBuf,
    layout: WorkLayout,
}

impl ExtractionManager {
    /// Manager for `archive` extracting into `work_dir`.
    pub fn new(archive: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            layout: WorkLayout::new(work_dir),
        }
    }

    /// Working directory layout.
    pub fn layout(&self) -> &WorkLayout {
        &self.layout
    }

    fn open_archive(&self) -> Result<ZipArchive<File>> {
        let file = File::open(&self.archive).map_err(io_err(&self.archive))?;
        Ok(ZipArchive::new(file)?)
    }

    /// Build timestamp embedded in the archive.
    pub fn artifact_timestamp(&self) -> Result<u64> {
        let mut archive = self.open_archive()?;
        let mut entry = match archive.by_name(MARKER_FILE) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(ExtractionError::MissingMarker(self.archive.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut contents = String::new();
        entry
            .read_to_string(&mut contents)
            .map_err(io_err(&self.archive))?;
        parse_timestamp(&contents).ok_or(ExtractionError::InvalidMarker(contents))
    }

    /// Timestamp of the last extraction, if readable.
    pub fn cached_timestamp(&self) -> Option<u64> {
        let contents = fs::read_to_string(&self.layout.marker).ok()?;
        parse_timestamp(&contents)
    }

    /// Current cache state.
    pub fn state(&self, clean: bool) -> Result<CacheState> {
        let artifact = self.artifact_timestamp()?;
        Ok(CacheState::decide(
            self.layout.root.is_dir(),
            clean,
            self.cached_timestamp(),
            artifact,
        ))
    }

    /// Make sure the working directory is up to date and list its artifacts.
    pub fn prepare(&self, clean: bool) -> Result<Extraction> {
        let build_timestamp = self.artifact_timestamp()?;
        let state = CacheState::decide(
            self.layout.root.is_dir(),
            clean,
            self.cached_timestamp(),
            build_timestamp,
        );

        let built = DateTime::<Utc>::from_timestamp_millis(build_timestamp as i64)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| build_timestamp.to_string());

        let extracted = match state {
            CacheState::Fresh(reason) => {
                info!(
                    work_dir = %self.layout.root.display(),
                    built = %built,
                    reason = ?reason,
                    "Extracting runtime"
                );
                self.extract(build_timestamp)?;
                true
            }
            CacheState::Cached => {
                debug!(
                    work_dir = %self.layout.root.display(),
                    built = %built,
                    "Reusing extracted runtime"
                );
                false
            }
        };

        Ok(Extraction {
            layout: self.layout.clone(),
            extracted,
            build_timestamp,
            artifacts: self.discover_artifacts()?,
        })
    }

    /// Rebuild the working directory from the archive.
    ///
    /// The marker is written last, so an interrupted extraction is never
    /// taken for a cached one.
    fn extract(&self, build_timestamp: u64) -> Result<()> {
        let root = &self.layout.root;
        if root.exists() {
            fs::remove_dir_all(root).map_err(io_err(root))?;
        }
        for dir in self.layout.directories() {
            fs::create_dir_all(dir).map_err(io_err(dir))?;
        }

        let native_prefix = format!("{ARCHIVE_NATIVE_PREFIX}{}/", native_platform());
        let mut archive = self.open_archive()?;
        let mut copied = 0usize;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let name = entry.name().to_string();
            if entry.enclosed_name().is_none() {
                return Err(ExtractionError::UnsafeEntry(name));
            }

            let target = match self.target_for(&name, &native_prefix) {
                Some(target) => target,
                None => continue,
            };

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(io_err(&target))?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            let mut out = File::create(&target).map_err(io_err(&target))?;
            io::copy(&mut entry, &mut out).map_err(io_err(&target))?;
            copied += 1;
        }

        let tmp = root.join(format!("{MARKER_FILE}.tmp"));
        fs::write(&tmp, build_timestamp.to_string()).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &self.layout.marker).map_err(io_err(&self.layout.marker))?;

        info!(files = copied, work_dir = %root.display(), "Extraction complete");
        Ok(())
    }

    /// Where an archive entry goes, or `None` when it is not extracted.
    fn target_for(&self, name: &str, native_prefix: &str) -> Option<PathBuf> {
        let layout = &self.layout;
        if name == ARCHIVE_WEB_XML {
            return Some(layout.web_xml.clone());
        }
        if name == ARCHIVE_LOGGING {
            return Some(layout.logging.clone());
        }
        if let Some(rest) = name.strip_prefix(ARCHIVE_EXTRA_PREFIX) {
            return (!rest.is_empty()).then(|| layout.extra.join(rest));
        }
        if let Some(rest) = name.strip_prefix(native_prefix) {
            return (!rest.is_empty()).then(|| layout.lib.join(rest));
        }
        if !name.contains('/') && is_artifact(Path::new(name)) {
            return Some(layout.apps.join(name));
        }
        None
    }

    /// Deployable artifacts in the working directory, sorted by path.
    pub fn discover_artifacts(&self) -> Result<Vec<PathBuf>> {
        let apps = &self.layout.apps;
        let mut artifacts = Vec::new();
        for entry in fs::read_dir(apps).map_err(io_err(apps))? {
            let path = entry.map_err(io_err(apps))?.path();
            if path.is_file() && is_artifact(&path) {
                artifacts.push(path);
            }
        }
        artifacts.sort();
        Ok(artifacts)
    }
}

fn is_artifact(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION))
}

fn parse_timestamp(contents: &str) -> Option<u64> {
    contents.trim().parse().ok()
}

/// Read one entry of a zip file, `None` when the entry does not exist.
pub fn read_archive_entry(archive: &Path, entry: &str) -> Result<Option<Vec<u8>>> {
    let file = File::open(archive).map_err(io_err(archive))?;
    let mut zip = ZipArchive::new(file)?;
    let mut found = match zip.by_name(entry) {
        Ok(found) => found,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    found.read_to_end(&mut bytes).map_err(io_err(archive))?;
    Ok(Some(bytes))
}

/// Expand a zip file into `target`, replacing previous contents.
pub fn expand_archive(archive: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        fs::remove_dir_all(target).map_err(io_err(target))?;
    }
    fs::create_dir_all(target).map_err(io_err(target))?;

    let file = File::open(archive).map_err(io_err(archive))?;
    let mut zip = ZipArchive::new(file)?;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ExtractionError::UnsafeEntry(entry.name().to_string()))?;
        let path = target.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&path).map_err(io_err(&path))?;
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut out = File::create(&path).map_err(io_err(&path))?;
        io::copy(&mut entry, &mut out).map_err(io_err(&path))?;
    }
    Ok(())
}
