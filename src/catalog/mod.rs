//! Release catalog: which boot media exist for which release, and where to
//! download them from.
//!
//! The catalog is built once at startup, either from the `RHCOS_VERSIONS`
//! JSON document or from the compiled-in defaults, and is read-only
//! afterwards.

mod artifact;

use std::collections::{BTreeMap, HashMap};

use url::Url;

use crate::config::ConfigError;

pub use artifact::{ArtifactKind, ArtifactSource, ImageChecksum};

/// Raw catalog shape: version -> {"iso_url", "rootfs_url", ...}.
pub type CatalogEntries = HashMap<String, HashMap<String, String>>;

const DEFAULT_RELEASES: &[(&str, &str, &str)] = &[
    (
        "4.6",
        "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/4.6/4.6.8/rhcos-4.6.8-x86_64-live.x86_64.iso",
        "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/4.6/4.6.8/rhcos-live-rootfs.x86_64.img",
    ),
    (
        "4.7",
        "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/4.7/4.7.13/rhcos-4.7.13-x86_64-live.x86_64.iso",
        "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/4.7/4.7.13/rhcos-live-rootfs.x86_64.img",
    ),
    (
        "4.8",
        "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/pre-release/4.8.0-rc.3/rhcos-4.8.0-rc.3-x86_64-live.x86_64.iso",
        "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/pre-release/4.8.0-rc.3/rhcos-live-rootfs.x86_64.img",
    ),
];

/// Both sources of a single release.
#[derive(Debug, Clone)]
pub struct Release {
    iso: ArtifactSource,
    rootfs: ArtifactSource,
}

impl Release {
    pub fn iso(&self) -> &ArtifactSource {
        &self.iso
    }

    pub fn rootfs(&self) -> &ArtifactSource {
        &self.rootfs
    }

    pub fn source(&self, kind: ArtifactKind) -> &ArtifactSource {
        match kind {
            ArtifactKind::Iso => &self.iso,
            ArtifactKind::Rootfs => &self.rootfs,
        }
    }
}

/// Immutable mapping from release version to its artifact sources.
#[derive(Debug, Clone)]
pub struct ReleaseCatalog {
    releases: BTreeMap<String, Release>,
}

impl ReleaseCatalog {
    /// Build the catalog from the raw version -> fields mapping.
    pub fn from_entries(entries: CatalogEntries) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }

        let mut releases = BTreeMap::new();
        for (version, fields) in entries {
            if !is_safe_version(&version) {
                return Err(ConfigError::InvalidVersion(version));
            }
            let iso = parse_source(&version, ArtifactKind::Iso, &fields)?;
            let rootfs = parse_source(&version, ArtifactKind::Rootfs, &fields)?;
            releases.insert(version, Release { iso, rootfs });
        }

        Ok(Self { releases })
    }

    /// Parse a JSON document such as the one carried by `RHCOS_VERSIONS`.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let entries: CatalogEntries = serde_json::from_str(json)?;
        Self::from_entries(entries)
    }

    /// The compiled-in release set.
    pub fn defaults() -> Result<Self, ConfigError> {
        let entries = DEFAULT_RELEASES
            .iter()
            .map(|(version, iso_url, rootfs_url)| {
                let fields = HashMap::from([
                    ("iso_url".to_string(), iso_url.to_string()),
                    ("rootfs_url".to_string(), rootfs_url.to_string()),
                ]);
                (version.to_string(), fields)
            })
            .collect();
        Self::from_entries(entries)
    }

    /// Returns the (iso, rootfs) sources for `version`.
    pub fn lookup(&self, version: &str) -> Option<(&ArtifactSource, &ArtifactSource)> {
        self.releases.get(version).map(|r| (r.iso(), r.rootfs()))
    }

    pub fn contains(&self, version: &str) -> bool {
        self.releases.contains_key(version)
    }

    /// Versions in ascending order.
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.releases.keys().map(String::as_str)
    }

    /// Every artifact source, release by release.
    pub fn sources(&self) -> impl Iterator<Item = &ArtifactSource> {
        self.releases
            .values()
            .flat_map(|r| ArtifactKind::ALL.into_iter().map(move |k| r.source(k)))
    }
}

/// Versions name cache directories, so they must be a single plain segment.
fn is_safe_version(version: &str) -> bool {
    !version.is_empty()
        && version != "."
        && version != ".."
        && !version.contains(['/', '\\'])
}

fn parse_source(
    version: &str,
    kind: ArtifactKind,
    fields: &HashMap<String, String>,
) -> Result<ArtifactSource, ConfigError> {
    let field = kind.url_field();
    let raw = fields
        .get(field)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingField {
            version: version.to_string(),
            field,
        })?;

    // Url::parse rejects relative references, so anything accepted is absolute.
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        version: version.to_string(),
        field,
        value: raw.to_string(),
        source,
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::UnsupportedScheme {
            version: version.to_string(),
            field,
            scheme: url.scheme().to_string(),
        });
    }

    let checksum = match fields.get(kind.checksum_field()) {
        Some(value) => Some(ImageChecksum::sha256(value).ok_or_else(|| {
            ConfigError::InvalidChecksum {
                version: version.to_string(),
                field: kind.checksum_field(),
            }
        })?),
        None => None,
    };

    Ok(ArtifactSource::new(version, kind, url, checksum))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_three_releases() {
        let catalog = ReleaseCatalog::defaults().unwrap();
        assert_eq!(catalog.versions().collect::<Vec<_>>(), ["4.6", "4.7", "4.8"]);
        assert_eq!(catalog.sources().count(), 6);

        let (iso, rootfs) = catalog.lookup("4.8").unwrap();
        assert_eq!(iso.kind(), ArtifactKind::Iso);
        assert_eq!(rootfs.kind(), ArtifactKind::Rootfs);
        assert!(iso.url().as_str().ends_with("rhcos-4.8.0-rc.3-x86_64-live.x86_64.iso"));
        assert!(catalog.lookup("4.9").is_none());
    }

    #[test]
    fn json_catalog_with_checksum() {
        let json = format!(
            r#"{{"4.9": {{"iso_url": "http://mirror.local/4.9.iso",
                         "rootfs_url": "http://mirror.local/4.9.img",
                         "iso_sha256": "{}"}}}}"#,
            "0f".repeat(32)
        );
        let catalog = ReleaseCatalog::from_json_str(&json).unwrap();
        let (iso, rootfs) = catalog.lookup("4.9").unwrap();
        assert_eq!(
            iso.checksum().unwrap().to_string(),
            format!("sha256:{}", "0f".repeat(32))
        );
        assert!(rootfs.checksum().is_none());
    }

    #[test]
    fn missing_rootfs_url_is_rejected() {
        let json = r#"{"4.8": {"iso_url": "https://example.com/live.iso"}}"#;
        let err = ReleaseCatalog::from_json_str(json).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField { ref version, field: "rootfs_url" } if version == "4.8"
        ));
    }

    #[test]
    fn relative_or_foreign_urls_are_rejected() {
        let relative = r#"{"4.8": {"iso_url": "/live.iso", "rootfs_url": "https://e.com/r.img"}}"#;
        assert!(matches!(
            ReleaseCatalog::from_json_str(relative),
            Err(ConfigError::InvalidUrl { field: "iso_url", .. })
        ));

        let ftp = r#"{"4.8": {"iso_url": "https://e.com/l.iso", "rootfs_url": "ftp://e.com/r.img"}}"#;
        assert!(matches!(
            ReleaseCatalog::from_json_str(ftp),
            Err(ConfigError::UnsupportedScheme { field: "rootfs_url", .. })
        ));
    }

    #[test]
    fn bad_checksum_and_empty_catalog_are_rejected() {
        let json = r#"{"4.8": {"iso_url": "https://e.com/l.iso",
                               "rootfs_url": "https://e.com/r.img",
                               "rootfs_sha256": "nope"}}"#;
        assert!(matches!(
            ReleaseCatalog::from_json_str(json),
            Err(ConfigError::InvalidChecksum { field: "rootfs_sha256", .. })
        ));
        assert!(matches!(
            ReleaseCatalog::from_json_str("{}"),
            Err(ConfigError::EmptyCatalog)
        ));
        assert!(matches!(
            ReleaseCatalog::from_json_str(
                r#"{"../etc": {"iso_url": "https://e.com/l.iso", "rootfs_url": "https://e.com/r.img"}}"#
            ),
            Err(ConfigError::InvalidVersion(_))
        ));
        assert!(matches!(
            ReleaseCatalog::from_json_str("not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
