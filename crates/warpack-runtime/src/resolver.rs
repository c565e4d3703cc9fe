// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Artifact resolution.
//!
//! Maps a deployment descriptor to one artifact path:
//!
//! 1. `embeddedArtifact` with `*` is turned into a pattern matched against
//!    the full paths of the discovered artifacts; the first match wins.
//! 2. `embeddedArtifact` without `*` must equal an artifact's file name.
//! 3. `externalArtifact` is used as is, relative paths resolved against the
//!    artifact directory.
//! 4. Otherwise, and whenever 1 or 2 find nothing, the first discovered
//!    artifact is used.

use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::config::DeploymentDescriptor;

/// Errors from artifact resolution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// No artifact was extracted and no external artifact is configured.
    #[error("no deployable artifact found for context '{context_path}'")]
    NoArtifact {
        /// Context path of the deployment.
        context_path: String,
    },

    /// The wildcard could not be compiled.
    #[error("invalid artifact pattern '{pattern}': {source}")]
    InvalidPattern {
        /// Configured pattern.
        pattern: String,
        /// Underlying error.
        #[source]
        source: regex::Error,
    },
}

/// Result type for resolution.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Where a resolved artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Extracted from the running archive.
    Embedded(PathBuf),
    /// Outside the archive.
    External(PathBuf),
}

impl ArtifactSource {
    /// Path of the artifact.
    pub fn path(&self) -> &Path {
        match self {
            Self::Embedded(p) | Self::External(p) => p,
        }
    }
}

/// Compile a `*` wildcard into a regex matching a full path ending in it.
///
/// Everything except `*` is literal; `\` separators match as written.
pub fn wildcard_to_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*?");
    Regex::new(&format!("^.*?{body}$"))
}

/// Resolves deployment descriptors against discovered artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactResolver<'a> {
    artifacts: &'a [PathBuf],
    base_dir: &'a Path,
}

impl<'a> ArtifactResolver<'a> {
    /// Resolver over sorted `artifacts`; `base_dir` anchors relative external paths.
    pub fn new(artifacts: &'a [PathBuf], base_dir: &'a Path) -> Self {
        Self {
            artifacts,
            base_dir,
        }
    }

    /// Resolve the artifact for `deployment`.
    pub fn resolve(&self, deployment: &DeploymentDescriptor) -> Result<ArtifactSource> {
        if let Some(reference) = deployment.embedded_artifact.as_deref() {
            if let Some(found) = self.match_embedded(reference)? {
                return Ok(ArtifactSource::Embedded(found.clone()));
            }
            warn!(
                artifact = %reference,
                context_path = %deployment.context_path,
                "Embedded artifact not found, using first artifact"
            );
            return self.first(deployment);
        }

        if let Some(external) = deployment.external_artifact.as_ref() {
            let path = if external.is_absolute() {
                external.clone()
            } else {
                self.base_dir.join(external)
            };
            return Ok(ArtifactSource::External(path));
        }

        self.first(deployment)
    }

    fn match_embedded(&self, reference: &str) -> Result<Option<&'a PathBuf>> {
        if reference.contains('*') {
            let regex = wildcard_to_regex(reference).map_err(|source| {
                ResolveError::InvalidPattern {
                    pattern: reference.to_string(),
                    source,
                }
            })?;
            return Ok(self
                .artifacts
                .iter()
                .find(|p| regex.is_match(&p.to_string_lossy())));
        }

        Ok(self.artifacts.iter().find(|p| {
            p.file_name()
                .is_some_and(|name| name.to_string_lossy() == reference)
        }))
    }

    fn first(&self, deployment: &DeploymentDescriptor) -> Result<ArtifactSource> {
        let first = self
            .artifacts
            .first()
            .ok_or_else(|| ResolveError::NoArtifact {
                context_path: deployment.context_path.clone(),
            })?;
        if self.artifacts.len() > 1 && deployment.embedded_artifact.is_none() {
            warn!(
                context_path = %deployment.context_path,
                count = self.artifacts.len(),
                artifact = %first.display(),
                "Several artifacts found and none selected, using the first"
            );
        }
        Ok(ArtifactSource::Embedded(first.clone()))
    }
}
