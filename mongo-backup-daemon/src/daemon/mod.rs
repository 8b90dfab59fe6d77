//! The top-level control loop.
//!
//! One cycle: if a backup is due, dump, verify by restoring, and prune; then
//! always collect and emit stats. Cycles are strictly sequential because the
//! single local engine and its data directory serve one role at a time.

pub mod clock;
pub mod schedule;
pub mod shutdown;

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveStore, BackupArtifact, PruneReport};
use crate::config::Config;
use crate::engine::ProcessSupervisor;
use crate::executor::BackupExecutor;
use crate::stats::sink::MetricsSink;
use crate::stats::{StatsCollector, StatsSnapshot};
use crate::tools::ToolRunner;
use crate::utils::errors::Result;
use crate::verify::{RestoreVerifier, Verification};

use self::clock::Clock;
use self::schedule::{unix_secs, SchedulePolicy};

/// What the backup half of a cycle did.
#[derive(Debug)]
pub enum BackupOutcome {
    NotDue,
    DumpFailed,
    Completed {
        artifact: BackupArtifact,
        verification: Verification,
        pruned: PruneReport,
    },
}

pub struct Daemon<R, M, C> {
    engine: ProcessSupervisor,
    store: ArchiveStore,
    executor: BackupExecutor<R>,
    verifier: RestoreVerifier<R>,
    stats: StatsCollector<R>,
    policy: SchedulePolicy,
    sink: M,
    clock: C,
    max_backups: usize,
    interval: Duration,
}

impl<R, M, C> Daemon<R, M, C>
where
    R: ToolRunner,
    M: MetricsSink,
    C: Clock,
{
    pub fn new(config: &Config, runner: Arc<R>, sink: M, clock: C) -> Self {
        Self::with_engine(config, ProcessSupervisor::new(&config.engine), runner, sink, clock)
    }

    pub fn with_engine(
        config: &Config,
        engine: ProcessSupervisor,
        runner: Arc<R>,
        sink: M,
        clock: C,
    ) -> Self {
        Self {
            engine,
            store: ArchiveStore::new(&config.backup.dir),
            executor: BackupExecutor::new(runner.clone(), &config.backup, &config.database.uri),
            verifier: RestoreVerifier::new(runner.clone(), &config.backup),
            stats: StatsCollector::new(runner, config.stats.count_query.clone()),
            policy: SchedulePolicy::from_secs(config.backup.period_secs, config.backup.fraction_secs),
            sink,
            clock,
            max_backups: config.backup.max_backups,
            interval: config.stats_interval(),
        }
    }

    #[cfg(test)]
    pub(crate) fn engine(&mut self) -> &mut ProcessSupervisor {
        &mut self.engine
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &ArchiveStore {
        &self.store
    }

    /// Re-validate the newest backup so the local engine holds real data.
    pub async fn startup(&mut self) {
        match self
            .verifier
            .restore_latest_on_startup(&mut self.engine, &self.store)
            .await
        {
            Ok(Some(verification)) => info!(?verification, "Startup restore finished"),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Startup restore failed"),
        }
    }

    /// Dump, verify and prune if a backup is due.
    pub async fn maybe_run_backup(&mut self) -> Result<BackupOutcome> {
        let last = self.store.last_backup_time()?;
        let now = self.clock.now();
        let next_due = self.policy.next_due(last);
        info!(
            last_backup = unix_secs(last),
            next_due = unix_secs(next_due),
            now = unix_secs(now),
            "Checking backup schedule"
        );

        if !self.policy.is_due(now, last) {
            return Ok(BackupOutcome::NotDue);
        }

        let destination = self.store.artifact_path(DateTime::<Local>::from(now));
        let artifact = match self.executor.run(&destination).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(error = %e, "No backup this cycle");
                return Ok(BackupOutcome::DumpFailed);
            }
        };

        let verification = self.verifier.restore(&mut self.engine, &artifact.path).await;
        let pruned = self.store.prune(self.max_backups)?;
        if !pruned.failed.is_empty() {
            warn!(failed = pruned.failed.len(), "Some outdated backups could not be deleted");
        }

        Ok(BackupOutcome::Completed {
            artifact,
            verification,
            pruned,
        })
    }

    /// Collect a stats snapshot and send it to the sink.
    pub async fn report_stats(&mut self) -> Result<StatsSnapshot> {
        let now = self.clock.now();
        let snapshot = self.stats.collect(&mut self.engine, &self.store, now).await?;
        snapshot.emit(&self.sink);
        Ok(snapshot)
    }

    /// One full cycle. Failures are logged; stats are reported even when
    /// the backup half fails.
    pub async fn run_cycle(&mut self) {
        match self.maybe_run_backup().await {
            Ok(outcome) => debug!(?outcome, "Backup step finished"),
            Err(e) => error!(error = %e, "Backup step failed"),
        }

        if let Err(e) = self.report_stats().await {
            error!(error = %e, "Stats reporting failed");
        }
    }

    /// Run until `shutdown` is cancelled, then stop the engine.
    ///
    /// Cancellation is checked between cycles and interrupts the sleep. A
    /// cycle in progress, including its dump and restore, runs to completion.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Backup daemon running");

        if !shutdown.is_cancelled() {
            self.startup().await;
        }

        while !shutdown.is_cancelled() {
            self.run_cycle().await;

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.clock.sleep(self.interval) => {}
            }
        }

        self.shutdown().await;
    }

    /// Startup restore plus a single cycle, then stop the engine.
    pub async fn run_once(&mut self, shutdown: CancellationToken) {
        if !shutdown.is_cancelled() {
            self.startup().await;
        }
        if !shutdown.is_cancelled() {
            self.run_cycle().await;
        }

        self.shutdown().await;
    }

    /// Stop the engine before exit.
    pub async fn shutdown(&mut self) {
        info!("Stopping backup daemon");
        self.engine.stop().await;
    }
}
