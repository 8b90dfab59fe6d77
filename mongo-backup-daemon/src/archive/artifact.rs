//! A single backup artifact on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// One compressed database snapshot. Its modification time is the
/// authoritative backup time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub path: PathBuf,

    /// Last modified time
    pub modified: SystemTime,

    /// File size in bytes
    pub size: u64,
}

impl BackupArtifact {
    /// Read artifact facts from a file path
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            modified: metadata.modified()?,
            size: metadata.len(),
        })
    }

    /// Time elapsed since the artifact was written, zero if it lies in the future
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified).unwrap_or_default()
    }
}
