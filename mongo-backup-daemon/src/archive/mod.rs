//! Backup artifact storage in a local directory.
//!
//! Artifacts are ordered by modification time, newest first. Retention keeps
//! a fixed number of the newest artifacts and deletes the rest.

pub mod artifact;

pub use artifact::BackupArtifact;

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

use crate::utils::errors::Result;

/// Outcome of a retention pass.
#[derive(Debug, Default)]
pub struct PruneReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

type Remover = fn(&Path) -> std::io::Result<()>;

/// The backup destination directory.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
    remove: Remover,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            remove: |path| std::fs::remove_file(path),
        }
    }

    #[cfg(test)]
    fn with_remover(mut self, remove: Remover) -> Self {
        self.remove = remove;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All artifacts, newest first. Creates the directory if needed.
    pub fn list(&self) -> Result<Vec<BackupArtifact>> {
        std::fs::create_dir_all(&self.dir)?;

        let mut artifacts = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            match entry.file_type() {
                Ok(kind) if kind.is_file() => {}
                _ => continue,
            }

            // Deleted between read_dir and stat
            match BackupArtifact::from_path(&entry.path()) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Skipping unreadable artifact"),
            }
        }

        artifacts.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(artifacts)
    }

    pub fn newest(&self) -> Result<Option<BackupArtifact>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Modification time of the newest artifact, or the Unix epoch when the
    /// store is empty.
    pub fn last_backup_time(&self) -> Result<SystemTime> {
        Ok(self
            .newest()?
            .map(|artifact| artifact.modified)
            .unwrap_or(SystemTime::UNIX_EPOCH))
    }

    /// Delete every artifact beyond the `max_count` newest.
    ///
    /// A failed deletion is logged and recorded; the remaining artifacts are
    /// still processed.
    pub fn prune(&self, max_count: usize) -> Result<PruneReport> {
        let mut report = PruneReport::default();

        for old in self.list()?.into_iter().skip(max_count) {
            info!(path = %old.path.display(), "Deleting outdated backup");
            match (self.remove)(&old.path) {
                Ok(()) => report.deleted.push(old.path),
                Err(e) => {
                    warn!(path = %old.path.display(), error = %e, "Failed to delete outdated backup");
                    report.failed.push(old.path);
                }
            }
        }

        Ok(report)
    }

    /// Path for a new artifact created at `at`.
    pub fn artifact_path(&self, at: DateTime<Local>) -> PathBuf {
        self.dir
            .join(format!("backup_{}", at.format("%Y-%m-%dT%H-%M-%S")))
    }
}
