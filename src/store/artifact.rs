use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::catalog::{ArtifactKind, ArtifactSource};

/// A complete artifact sitting at its final cache path.
///
/// Values are only built after the file has been renamed into place, so
/// holding one means the file is whole.
#[derive(Debug, Clone)]
pub struct CachedArtifact {
    version: String,
    kind: ArtifactKind,
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

impl CachedArtifact {
    /// Read size and modification time of an already-placed file.
    pub async fn from_path(source: &ArtifactSource, path: &Path) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self {
            version: source.version().to_string(),
            kind: source.kind(),
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }
}
