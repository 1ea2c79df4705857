//! Downloads a single remote artifact into the local cache.
//!
//! The body is streamed into `<dest>.download` next to the final path and only
//! renamed onto `dest` once it is complete and verified, so readers never see
//! a partial file at the final path.

mod backoff;
mod error;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ArtifactSource;
use crate::config::FetchSettings;
use crate::store::CachedArtifact;

pub use backoff::BackoffPolicy;
pub use error::{FetchCause, FetchError};

const USER_AGENT: &str = concat!("discovery-image-service/", env!("CARGO_PKG_VERSION"));

/// Retry and timeout policy for the fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Total attempts per artifact, including the first.
    pub max_attempts: u32,

    /// Bound on a single attempt, body included.
    pub attempt_timeout: Duration,

    pub backoff: BackoffPolicy,
}

impl From<&FetchSettings> for FetcherConfig {
    fn from(settings: &FetchSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            attempt_timeout: settings.attempt_timeout,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// HTTP fetcher with retry and integrity checks.
pub struct Fetcher {
    client: Client,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    /// Download `source` to `dest`, retrying transient failures.
    pub async fn fetch(
        &self,
        source: &ArtifactSource,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<CachedArtifact, FetchError> {
        let temp_path = temp_path_for(dest);
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(
                version = %source.version(),
                kind = %source.kind(),
                url = %source.url(),
                attempt,
                "Fetching artifact"
            );

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(FetchCause::Cancelled),
                result = tokio::time::timeout(
                    self.config.attempt_timeout,
                    self.attempt(source, dest, &temp_path),
                ) => result.unwrap_or(Err(FetchCause::Timeout)),
            };

            let cause = match outcome {
                Ok(artifact) => {
                    info!(
                        version = %source.version(),
                        kind = %source.kind(),
                        size_bytes = artifact.size(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        attempts = attempt,
                        "Artifact downloaded"
                    );
                    return Ok(artifact);
                }
                Err(cause) => cause,
            };

            // An interrupted attempt may leave its temp file behind.
            remove_temp(&temp_path).await;

            if !cause.is_retryable() || attempt >= self.config.max_attempts {
                return Err(FetchError::new(source, attempt, cause));
            }

            let delay = self.config.backoff.delay(attempt - 1);
            warn!(
                version = %source.version(),
                kind = %source.kind(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %cause,
                "Fetch attempt failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(FetchError::new(source, attempt, FetchCause::Cancelled));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        source: &ArtifactSource,
        dest: &Path,
        temp_path: &Path,
    ) -> Result<CachedArtifact, FetchCause> {
        let mut response = self.client.get(source.url().clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchCause::Status(status));
        }
        let expected_len = response.content_length();

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(temp_path).await?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = expected_len
            && expected != written
        {
            return Err(FetchCause::Truncated {
                expected,
                actual: written,
            });
        }

        let digest = hasher.finalize();
        if let Some(checksum) = source.checksum()
            && !checksum.matches(&digest)
        {
            return Err(FetchCause::ChecksumMismatch {
                expected: checksum.to_string(),
                actual: format!("sha256:{}", hex::encode(digest)),
            });
        }

        fs::rename(temp_path, dest).await?;

        Ok(CachedArtifact::from_path(source, dest).await?)
    }
}

/// Adopt a file left at `dest` by an earlier run.
///
/// The file is reused when it is non-empty and, if the source carries a
/// checksum, its digest matches. Returns `None` when it must be fetched again.
pub async fn adopt_existing(source: &ArtifactSource, dest: &Path) -> Option<CachedArtifact> {
    let artifact = CachedArtifact::from_path(source, dest).await.ok()?;
    if artifact.size() == 0 {
        return None;
    }

    if let Some(checksum) = source.checksum() {
        let path = dest.to_path_buf();
        let digest = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut file = std::fs::File::open(path)?;
            let mut hasher = Sha256::new();
            std::io::copy(&mut file, &mut hasher)?;
            Ok(hasher.finalize().to_vec())
        })
        .await
        .ok()?
        .ok()?;

        if !checksum.matches(&digest) {
            warn!(
                version = %source.version(),
                kind = %source.kind(),
                path = %dest.display(),
                "Cached artifact does not match its checksum, fetching again"
            );
            return None;
        }
    }

    Some(artifact)
}

fn temp_path_for(dest: &Path) -> PathBuf {
    dest.with_extension("download")
}

async fn remove_temp(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %temp_path.display(), error = %e, "Failed to remove temporary file");
    }
}
