//! Backup executor - runs the dump tool against the live database.
//!
//! A failed dump never leaves an artifact behind: partial output is deleted
//! and the optional remediation command (typically restarting the tunnel to
//! the live database) is run before the failure is reported. Partial output
//! is also deleted when a dump in progress is dropped.

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::archive::BackupArtifact;
use crate::config::{BackupConfig, CommandConfig};
use crate::tools::ToolRunner;
use crate::utils::errors::{DaemonError, Result};

pub struct BackupExecutor<R> {
    runner: Arc<R>,
    dump: CommandConfig,
    uri: String,
    remediation: Option<CommandConfig>,
}

impl<R: ToolRunner> BackupExecutor<R> {
    pub fn new(runner: Arc<R>, config: &BackupConfig, uri: impl Into<String>) -> Self {
        Self {
            runner,
            dump: config.dump.clone(),
            uri: uri.into(),
            remediation: config.remediation.clone(),
        }
    }

    /// Dump the live database to `destination`.
    ///
    /// Returns `DumpFailed` after cleaning up and running remediation.
    pub async fn run(&self, destination: &Path) -> Result<BackupArtifact> {
        info!(path = %destination.display(), "Starting backup");

        let partial = PartialArchive::new(destination);
        match self.dump(destination).await {
            Ok(artifact) => {
                partial.keep();
                info!(
                    path = %artifact.path.display(),
                    size = artifact.size,
                    "Backup written"
                );
                Ok(artifact)
            }
            Err(e) => {
                error!(path = %destination.display(), error = %e, "Backup failed");
                drop(partial);
                self.remediate().await;
                Err(e)
            }
        }
    }

    async fn dump(&self, destination: &Path) -> Result<BackupArtifact> {
        let archive = destination.to_string_lossy();
        let command = self
            .dump
            .render(&[("archive", archive.as_ref()), ("uri", self.uri.as_str())]);

        let failed = |detail: String| DaemonError::DumpFailed {
            path: destination.to_path_buf(),
            detail,
        };

        let output = self
            .runner
            .run(&command)
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !output.success() {
            return Err(failed(output.failure_detail()));
        }

        BackupArtifact::from_path(destination)
            .map_err(|e| failed(format!("dump reported success but archive is unreadable: {e}")))
    }

    async fn remediate(&self) {
        let Some(remediation) = &self.remediation else {
            return;
        };

        let command = remediation.render(&[]);
        info!(program = %command.program, "Running remediation after failed backup");
        match self.runner.run(&command).await {
            Ok(output) if output.success() => info!("Remediation completed"),
            Ok(output) => warn!(detail = %output.failure_detail(), "Remediation failed"),
            Err(e) => warn!(error = %e, "Remediation failed"),
        }
    }
}

/// Deletes the archive on drop unless the dump completed.
struct PartialArchive<'a> {
    path: &'a Path,
    keep: bool,
}

impl<'a> PartialArchive<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialArchive<'_> {
    fn drop(&mut self) {
        if !self.keep {
            discard_partial(self.path);
        }
    }
}

fn discard_partial(destination: &Path) {
    match std::fs::remove_file(destination) {
        Ok(()) => info!(path = %destination.display(), "Removed partial backup"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %destination.display(), error = %e, "Failed to remove partial backup"),
    }
}
