//! Restore verification.
//!
//! A backup is only trusted once it has been restored into a clean local
//! engine. Each attempt wipes the engine's data directory first, so a crashed
//! restore never leaves partial data behind. An artifact that cannot be
//! restored within the attempt bound is deleted.

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::archive::ArchiveStore;
use crate::config::{BackupConfig, CommandConfig};
use crate::engine::ProcessSupervisor;
use crate::tools::ToolRunner;
use crate::utils::errors::{DaemonError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Restored successfully on the given attempt
    Verified { attempts: u32 },
    /// Every attempt failed; the artifact was deleted
    Discarded { attempts: u32 },
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified { .. })
    }
}

pub struct RestoreVerifier<R> {
    runner: Arc<R>,
    restore: CommandConfig,
    max_attempts: u32,
}

impl<R: ToolRunner> RestoreVerifier<R> {
    pub fn new(runner: Arc<R>, config: &BackupConfig) -> Self {
        Self {
            runner,
            restore: config.restore.clone(),
            max_attempts: config.restore_attempts.max(1),
        }
    }

    /// Restore `artifact` into a freshly wiped engine, retrying up to the
    /// attempt bound. On success the engine is left running with the
    /// restored data.
    pub async fn restore(&self, engine: &mut ProcessSupervisor, artifact: &Path) -> Verification {
        for attempt in 1..=self.max_attempts {
            info!(path = %artifact.display(), attempt, "Restoring backup");

            match self.attempt(engine, artifact).await {
                Ok(()) => {
                    info!(path = %artifact.display(), attempt, "Backup verified");
                    return Verification::Verified { attempts: attempt };
                }
                Err(e) => {
                    warn!(
                        path = %artifact.display(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Restore attempt failed"
                    );
                    engine.stop().await;
                    if let Err(e) = wipe_data_dir(engine.data_dir()) {
                        warn!(error = %e, "Failed to wipe data directory after failed restore");
                    }
                }
            }
        }

        error!(
            path = %artifact.display(),
            attempts = self.max_attempts,
            "Backup could not be restored, deleting it as corrupt"
        );
        if let Err(e) = std::fs::remove_file(artifact) {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!(path = %artifact.display(), error = %e, "Failed to delete corrupt backup");
            }
        }
        Verification::Discarded {
            attempts: self.max_attempts,
        }
    }

    /// Restore the newest artifact, if any. Run once at startup so the local
    /// engine holds real data and the latest backup is re-validated.
    pub async fn restore_latest_on_startup(
        &self,
        engine: &mut ProcessSupervisor,
        store: &ArchiveStore,
    ) -> Result<Option<Verification>> {
        let Some(newest) = store.newest()? else {
            info!("No backups yet, skipping startup restore");
            return Ok(None);
        };

        info!(path = %newest.path.display(), "Re-validating newest backup on startup");
        Ok(Some(self.restore(engine, &newest.path).await))
    }

    async fn attempt(&self, engine: &mut ProcessSupervisor, artifact: &Path) -> Result<()> {
        engine.stop().await;
        wipe_data_dir(engine.data_dir())?;
        engine.ensure_started().await?;

        let archive = artifact.to_string_lossy();
        let command = self.restore.render(&[("archive", archive.as_ref())]);
        let output = self.runner.run(&command).await?;

        if output.success() {
            Ok(())
        } else {
            Err(DaemonError::RestoreFailed {
                path: artifact.to_path_buf(),
                detail: output.failure_detail(),
            })
        }
    }
}

/// Remove the data directory recursively; a missing directory is fine.
fn wipe_data_dir(data_dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(data_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::{exit, failing_engine, restore_into, sleeping_engine, write_artifact, ScriptedRunner};
    use tempfile::TempDir;

    fn verifier(runner: Arc<ScriptedRunner>) -> RestoreVerifier<ScriptedRunner> {
        RestoreVerifier::new(runner, &BackupConfig::default())
    }

    #[tokio::test]
    async fn test_successful_restore_leaves_engine_running() {
        let temp = TempDir::new().unwrap();
        let mut engine = sleeping_engine(temp.path());
        let artifact = write_artifact(&temp.path().join("backups"), "backup_1", 1_000);

        // Stale data from an earlier restore must be wiped
        std::fs::create_dir_all(engine.data_dir()).unwrap();
        std::fs::write(engine.data_dir().join("stale"), b"old").unwrap();

        let runner = Arc::new(
            ScriptedRunner::new().on("mongorestore", restore_into(engine.data_dir().to_path_buf())),
        );
        let result = verifier(runner.clone()).restore(&mut engine, &artifact).await;

        assert_eq!(result, Verification::Verified { attempts: 1 });
        assert!(engine.is_running());
        assert!(artifact.exists());
        assert!(!engine.data_dir().join("stale").exists());
        assert_eq!(
            std::fs::read_to_string(engine.data_dir().join("restored-from")).unwrap(),
            artifact.to_string_lossy()
        );
        assert_eq!(
            runner.calls("mongorestore")[0].args,
            vec!["--gzip".to_string(), format!("--archive={}", artifact.display())]
        );

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let temp = TempDir::new().unwrap();
        let mut engine = sleeping_engine(temp.path());
        let artifact = write_artifact(&temp.path().join("backups"), "backup_1", 1_000);
        let data_dir = engine.data_dir().to_path_buf();

        let runner = Arc::new(ScriptedRunner::new().on("mongorestore", move |command, index| {
            // Leave debris behind on failures; it must be wiped before the next try
            std::fs::write(data_dir.join(format!("partial-{index}")), b"x").unwrap();
            if index < 2 {
                exit(1, "Failed: corruption found in archive")
            } else {
                restore_into(data_dir.clone())(command, index)
            }
        }));
        let result = verifier(runner.clone()).restore(&mut engine, &artifact).await;

        assert_eq!(result, Verification::Verified { attempts: 3 });
        assert_eq!(runner.call_count("mongorestore"), 3);
        assert!(!engine.data_dir().join("partial-0").exists());
        assert!(!engine.data_dir().join("partial-1").exists());
        assert!(artifact.exists());

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_exhausted_attempts_delete_artifact() {
        let temp = TempDir::new().unwrap();
        let mut engine = sleeping_engine(temp.path());
        let backups = temp.path().join("backups");
        let artifact = write_artifact(&backups, "backup_1", 1_000);

        let runner = Arc::new(ScriptedRunner::new().on("mongorestore", |_, _| exit(1, "bad archive")));
        let result = verifier(runner.clone()).restore(&mut engine, &artifact).await;

        assert_eq!(result, Verification::Discarded { attempts: 10 });
        assert!(!result.is_verified());
        assert_eq!(runner.call_count("mongorestore"), 10);
        assert!(!artifact.exists());
        assert!(ArchiveStore::new(&backups).list().unwrap().is_empty());
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_engine_start_failure_counts_as_attempt() {
        let temp = TempDir::new().unwrap();
        let mut engine = failing_engine(temp.path());
        let artifact = write_artifact(&temp.path().join("backups"), "backup_1", 1_000);

        let runner = Arc::new(ScriptedRunner::new());
        let config = BackupConfig {
            restore_attempts: 2,
            ..BackupConfig::default()
        };
        let result = RestoreVerifier::new(runner.clone(), &config)
            .restore(&mut engine, &artifact)
            .await;

        assert_eq!(result, Verification::Discarded { attempts: 2 });
        // The restore tool is never reached when the engine does not come up
        assert_eq!(runner.call_count("mongorestore"), 0);
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn test_startup_restore_picks_newest() {
        let temp = TempDir::new().unwrap();
        let mut engine = sleeping_engine(temp.path());
        let backups = temp.path().join("backups");
        write_artifact(&backups, "backup_old", 1_000);
        let newest = write_artifact(&backups, "backup_new", 2_000);

        let runner = Arc::new(
            ScriptedRunner::new().on("mongorestore", restore_into(engine.data_dir().to_path_buf())),
        );
        let result = verifier(runner.clone())
            .restore_latest_on_startup(&mut engine, &ArchiveStore::new(&backups))
            .await
            .unwrap();

        assert_eq!(result, Some(Verification::Verified { attempts: 1 }));
        assert_eq!(
            runner.calls("mongorestore")[0].flag_value("--archive"),
            newest.to_str()
        );

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_startup_restore_with_empty_store() {
        let temp = TempDir::new().unwrap();
        let mut engine = sleeping_engine(temp.path());
        let runner = Arc::new(ScriptedRunner::new());

        let result = verifier(runner.clone())
            .restore_latest_on_startup(&mut engine, &ArchiveStore::new(temp.path().join("backups")))
            .await
            .unwrap();

        assert_eq!(result, None);
        assert!(!engine.is_running());
        assert_eq!(runner.call_count("mongorestore"), 0);
    }

    #[test]
    fn test_wipe_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert!(wipe_data_dir(&temp.path().join("absent")).is_ok());
    }
}
