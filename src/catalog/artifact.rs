use std::fmt;

use url::Url;

/// The two pieces of boot media published for every release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    Iso,
    Rootfs,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Iso, ArtifactKind::Rootfs];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Iso => "iso",
            ArtifactKind::Rootfs => "rootfs",
        }
    }

    /// Catalog key holding the download location.
    pub fn url_field(&self) -> &'static str {
        match self {
            ArtifactKind::Iso => "iso_url",
            ArtifactKind::Rootfs => "rootfs_url",
        }
    }

    /// Optional catalog key holding the expected SHA-256 digest.
    pub fn checksum_field(&self) -> &'static str {
        match self {
            ArtifactKind::Iso => "iso_sha256",
            ArtifactKind::Rootfs => "rootfs_sha256",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected SHA-256 digest of an artifact, stored as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChecksum {
    value: String,
}

impl ImageChecksum {
    /// Accepts exactly 32 bytes of hex, in either case.
    pub fn sha256(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        match hex::decode(&value) {
            Ok(bytes) if bytes.len() == 32 => Some(Self { value }),
            _ => None,
        }
    }

    /// Compare against a finished digest.
    pub fn matches(&self, digest: &[u8]) -> bool {
        hex::encode(digest) == self.value
    }
}

impl fmt::Display for ImageChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.value)
    }
}

/// Where one artifact of one release is downloaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSource {
    version: String,
    kind: ArtifactKind,
    url: Url,
    checksum: Option<ImageChecksum>,
}

impl ArtifactSource {
    pub fn new(
        version: impl Into<String>,
        kind: ArtifactKind,
        url: Url,
        checksum: Option<ImageChecksum>,
    ) -> Self {
        Self {
            version: version.into(),
            kind,
            url,
            checksum,
        }
    }

    /// Release version, e.g. 4.8
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn checksum(&self) -> Option<&ImageChecksum> {
        self.checksum.as_ref()
    }
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.version, self.kind)
    }
}
