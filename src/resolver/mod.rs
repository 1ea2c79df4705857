//! Mapping from an opaque cluster identifier to a release version.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid cluster identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("cluster {identifier} lookup returned {status}")]
    Status {
        identifier: String,
        status: StatusCode,
    },

    #[error("cluster {0} does not report an OpenShift version")]
    MissingVersion(String),

    #[error("cluster {identifier} runs {version}, which has no image in the catalog")]
    UnknownVersion { identifier: String, version: String },
}

/// Picks the release version whose image a cluster should receive.
#[async_trait::async_trait]
pub trait VersionResolver: Send + Sync {
    async fn resolve(&self, identifier: &str) -> Result<String, ResolutionError>;
}

/// Serves one fixed version to every cluster.
pub struct StaticResolver {
    version: String,
}

impl StaticResolver {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

#[async_trait::async_trait]
impl VersionResolver for StaticResolver {
    async fn resolve(&self, _identifier: &str) -> Result<String, ResolutionError> {
        Ok(self.version.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ClusterInfo {
    #[serde(default)]
    openshift_version: Option<String>,
}

/// Asks the assisted service which OpenShift version a cluster runs.
pub struct ServiceResolver {
    client: Client,
    base_url: Url,
    known_versions: Vec<String>,
}

impl ServiceResolver {
    pub fn new(base_url: Url, known_versions: Vec<String>) -> Result<Self, ResolutionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url,
            known_versions,
        })
    }

    fn cluster_url(&self, identifier: &str) -> Result<Url, ResolutionError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ResolutionError::InvalidIdentifier(identifier.to_string()))?
            .pop_if_empty()
            .extend(["api", "assisted-install", "v2", "clusters", identifier]);
        Ok(url)
    }

    /// Exact catalog key first, then the `major.minor` prefix (4.8.2 -> 4.8).
    fn match_version(&self, reported: &str) -> Option<String> {
        if self.known_versions.iter().any(|v| v == reported) {
            return Some(reported.to_string());
        }

        let mut parts = reported.split('.');
        let major_minor = match (parts.next(), parts.next()) {
            (Some(major), Some(minor)) => format!("{major}.{minor}"),
            _ => return None,
        };
        self.known_versions
            .iter()
            .find(|v| **v == major_minor)
            .cloned()
    }
}

#[async_trait::async_trait]
impl VersionResolver for ServiceResolver {
    async fn resolve(&self, identifier: &str) -> Result<String, ResolutionError> {
        let url = self.cluster_url(identifier)?;
        debug!(url = %url, "Looking up cluster version");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolutionError::Status {
                identifier: identifier.to_string(),
                status,
            });
        }

        let info: ClusterInfo = response.json().await?;
        let reported = info
            .openshift_version
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ResolutionError::MissingVersion(identifier.to_string()))?;

        self.match_version(&reported)
            .ok_or_else(|| ResolutionError::UnknownVersion {
                identifier: identifier.to_string(),
                version: reported,
            })
    }
}
