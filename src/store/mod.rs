//! Local image store.
//!
//! Owns the cache directory, runs the fetcher for every artifact in the
//! release catalog, and hands out read handles onto cached ISOs.
//!
//! `populate` runs to completion before the HTTP listener is bound, so at
//! serve time the state map is only ever read.

mod artifact;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::catalog::{ArtifactKind, ArtifactSource, ReleaseCatalog};
use crate::config::Config;
use crate::fetch::{self, FetchError, Fetcher, FetcherConfig};

pub use artifact::CachedArtifact;

/// Errors from image store lookups.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version {0} is not in the release catalog")]
    NotFound(String),

    #[error("image for version {0} has not been populated")]
    NotPopulated(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Every artifact that could not be fetched during a populate run.
#[derive(Debug)]
pub struct PopulateError {
    pub failures: Vec<FetchError>,
}

impl fmt::Display for PopulateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to populate {} artifact(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PopulateError {}

type ArtifactKey = (String, ArtifactKind);

/// Cache of boot media for every release in the catalog.
pub struct ImageStore {
    catalog: Arc<ReleaseCatalog>,
    cache_dir: PathBuf,
    fetcher: Fetcher,
    max_concurrent_fetches: usize,
    artifacts: RwLock<HashMap<ArtifactKey, CachedArtifact>>,
}

impl ImageStore {
    /// Create an empty store; nothing is downloaded until `populate`.
    pub fn new(config: &Config, catalog: Arc<ReleaseCatalog>) -> Result<Self, StoreError> {
        let fetcher = Fetcher::new(FetcherConfig::from(&config.fetch))?;

        Ok(Self {
            catalog,
            cache_dir: config.data_dir.clone(),
            fetcher,
            max_concurrent_fetches: config.fetch.max_concurrent_fetches.max(1),
            artifacts: RwLock::new(HashMap::new()),
        })
    }

    /// Deterministic cache location: `{cache_dir}/{version}/{kind}.img`.
    pub fn artifact_path(&self, version: &str, kind: ArtifactKind) -> PathBuf {
        self.cache_dir.join(version).join(format!("{kind}.img"))
    }

    /// Make sure every catalog artifact is cached locally.
    ///
    /// Fetches run concurrently and independently; one failure does not stop
    /// the others. Once all fetches have finished, every release whose ISO and
    /// rootfs both succeeded is committed, and every failure is reported
    /// together.
    pub async fn populate(&self, cancel: &CancellationToken) -> Result<(), PopulateError> {
        info!(
            releases = self.catalog.versions().count(),
            cache_dir = %self.cache_dir.display(),
            "Populating image store"
        );

        let results: Vec<Result<CachedArtifact, FetchError>> = stream::iter(self.catalog.sources())
            .map(|source| self.ensure_artifact(source, cancel))
            .buffer_unordered(self.max_concurrent_fetches)
            .collect()
            .await;

        let mut failures = Vec::new();
        let mut cached = Vec::new();
        for result in results {
            match result {
                Ok(artifact) => cached.push(artifact),
                Err(e) => {
                    error!(
                        version = %e.artifact.version(),
                        kind = %e.artifact.kind(),
                        error = %e,
                        "Artifact could not be cached"
                    );
                    failures.push(e);
                }
            }
        }

        // A release is only usable with both of its artifacts.
        let incomplete: HashSet<&str> = failures.iter().map(|f| f.artifact.version()).collect();
        {
            let mut artifacts = self
                .artifacts
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for artifact in cached {
                if incomplete.contains(artifact.version()) {
                    continue;
                }
                artifacts.insert((artifact.version().to_string(), artifact.kind()), artifact);
            }
        }

        if failures.is_empty() {
            info!("Image store populated");
            Ok(())
        } else {
            Err(PopulateError { failures })
        }
    }

    async fn ensure_artifact(
        &self,
        source: &ArtifactSource,
        cancel: &CancellationToken,
    ) -> Result<CachedArtifact, FetchError> {
        let dest = self.artifact_path(source.version(), source.kind());

        if let Some(existing) = fetch::adopt_existing(source, &dest).await {
            info!(
                version = %source.version(),
                kind = %source.kind(),
                size_bytes = existing.size(),
                modified = ?existing.modified(),
                "Reusing cached artifact"
            );
            return Ok(existing);
        }

        self.fetcher.fetch(source, &dest, cancel).await
    }

    /// Metadata of a committed artifact.
    pub fn cached(&self, version: &str, kind: ArtifactKind) -> Option<CachedArtifact> {
        self.artifacts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(version.to_string(), kind))
            .cloned()
    }

    /// Open a fresh read handle onto the cached ISO for `version`.
    ///
    /// Every call opens its own file; the handle is closed when dropped.
    pub async fn base_file(&self, version: &str) -> Result<tokio::fs::File, StoreError> {
        if self.catalog.lookup(version).is_none() {
            return Err(StoreError::NotFound(version.to_string()));
        }

        let artifact = self
            .cached(version, ArtifactKind::Iso)
            .ok_or_else(|| StoreError::NotPopulated(version.to_string()))?;

        Ok(tokio::fs::File::open(artifact.path()).await?)
    }
}
