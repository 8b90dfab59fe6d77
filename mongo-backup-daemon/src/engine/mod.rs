//! Lifecycle of the local database engine subprocess.
//!
//! The supervisor owns the single engine child process. Readiness is inferred
//! from a fixed settle delay after launch rather than a health probe, so
//! `ensure_started` blocks for that delay on every real start.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::{CommandConfig, EngineConfig};
use crate::utils::errors::{DaemonError, Result};

pub struct ProcessSupervisor {
    command: CommandConfig,
    data_dir: PathBuf,
    log_file: PathBuf,
    settle_delay: Duration,
    child: Option<Child>,
}

impl ProcessSupervisor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            command: config.command.clone(),
            data_dir: config.data_dir.clone(),
            log_file: config.log_file.clone(),
            settle_delay: Duration::from_secs(config.settle_delay_secs),
            child: None,
        }
    }

    /// Override the settle delay (tests use milliseconds).
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Process id of the live engine, if any.
    #[cfg(test)]
    pub(crate) fn pid(&mut self) -> Option<u32> {
        if self.is_running() {
            self.child.as_ref().and_then(Child::id)
        } else {
            None
        }
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Start the engine unless it is already running, then wait out the
    /// settle delay.
    pub async fn ensure_started(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("Engine already running");
            return Ok(());
        }

        info!(data_dir = %self.data_dir.display(), "Starting database engine");
        fs::create_dir_all(&self.data_dir)?;
        let stdout = self.open_rotated_log()?;
        let stderr = stdout.try_clone()?;

        let data_dir = self.data_dir.to_string_lossy().into_owned();
        let command = self.command.render(&[("data_dir", data_dir.as_str())]);
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DaemonError::EngineStart(format!("failed to spawn {}: {}", command.program, e))
            })?;

        debug!(pid = ?child.id(), "Engine spawned, waiting to settle");
        self.child = Some(child);
        tokio::time::sleep(self.settle_delay).await;

        if !self.is_running() {
            let status = match self.child.take() {
                Some(mut child) => match child.try_wait() {
                    Ok(Some(status)) => status.to_string(),
                    _ => "unknown status".to_string(),
                },
                None => "no process".to_string(),
            };
            return Err(DaemonError::EngineStart(format!(
                "engine exited during startup ({}), see {}",
                status,
                self.log_file.display()
            )));
        }

        info!(pid = ?self.child.as_ref().and_then(Child::id), "Database engine started");
        Ok(())
    }

    /// Kill the engine if it is alive and wait out the settle delay.
    /// A no-op when nothing is running.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            debug!("Engine not running, nothing to stop");
            return;
        }

        let Some(mut child) = self.child.take() else {
            return;
        };

        info!(pid = ?child.id(), "Stopping database engine");
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill database engine");
        }
        tokio::time::sleep(self.settle_delay).await;
    }

    /// Move the previous log to `<log>.1` and open a fresh one.
    fn open_rotated_log(&self) -> Result<File> {
        if let Some(parent) = self.log_file.parent() {
            fs::create_dir_all(parent)?;
        }

        if self.log_file.exists() {
            let mut rotated = self.log_file.clone().into_os_string();
            rotated.push(".1");
            fs::rename(&self.log_file, &rotated)?;
        }

        Ok(File::create(&self.log_file)?)
    }
}
