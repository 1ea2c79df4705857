use std::io;

use reqwest::StatusCode;
use thiserror::Error;

use crate::catalog::ArtifactSource;

/// Why a single fetch attempt failed.
#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream responded with {0}")]
    Status(StatusCode),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("body truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("attempt timed out")]
    Timeout,

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchCause {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Client errors (other than 429) and local I/O failures are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchCause::Http(_)
            | FetchCause::Truncated { .. }
            | FetchCause::ChecksumMismatch { .. }
            | FetchCause::Timeout => true,
            FetchCause::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchCause::Io(_) | FetchCause::Cancelled => false,
        }
    }
}

/// A fetch that gave up.
#[derive(Debug, Error)]
#[error("failed to fetch {artifact} from {url} after {attempts} attempt(s): {cause}")]
pub struct FetchError {
    pub artifact: ArtifactSource,
    pub url: String,
    pub attempts: u32,
    #[source]
    pub cause: FetchCause,
}

impl FetchError {
    pub fn new(artifact: &ArtifactSource, attempts: u32, cause: FetchCause) -> Self {
        Self {
            artifact: artifact.clone(),
            url: artifact.url().to_string(),
            attempts,
            cause,
        }
    }
}
