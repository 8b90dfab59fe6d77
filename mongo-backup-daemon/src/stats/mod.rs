//! Health statistics.
//!
//! A snapshot combines document/collection/database counts read from the
//! local engine (which holds the most recently verified backup) with facts
//! about the archive store.

pub mod sink;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

use crate::archive::ArchiveStore;
use crate::config::CommandConfig;
use crate::engine::ProcessSupervisor;
use crate::tools::ToolRunner;
use crate::utils::errors::{DaemonError, Result};

use self::sink::MetricsSink;

/// Counts reported by the count query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbCounts {
    pub databases: u64,
    pub collections: u64,
    pub documents: u64,
}

impl DbCounts {
    /// Parse the last line of `stdout` that holds a JSON object.
    pub fn parse(stdout: &str) -> Result<Self> {
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .filter(|line| line.starts_with('{'))
            .find_map(|line| serde_json::from_str(line).ok())
            .ok_or_else(|| {
                DaemonError::StatsQuery(format!(
                    "no counts object in query output: {:?}",
                    stdout.trim()
                ))
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub databases: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup_size: Option<u64>,
    /// Seconds since the newest backup (since the epoch when there is none)
    pub age: f64,
    pub backups_count: usize,
}

impl StatsSnapshot {
    /// Every present field as a metric key/value pair.
    pub fn metrics(&self) -> Vec<(&'static str, f64)> {
        let mut metrics = Vec::with_capacity(6);
        if let Some(documents) = self.documents {
            metrics.push(("documents", documents as f64));
        }
        if let Some(collections) = self.collections {
            metrics.push(("collections", collections as f64));
        }
        if let Some(databases) = self.databases {
            metrics.push(("databases", databases as f64));
        }
        if let Some(size) = self.last_backup_size {
            metrics.push(("last_backup_size", size as f64));
        }
        metrics.push(("age", self.age));
        metrics.push(("backups_count", self.backups_count as f64));
        metrics
    }

    /// Log a readable dump and send every metric to `sink`.
    pub fn emit<M: MetricsSink>(&self, sink: &M) {
        match serde_json::to_string_pretty(self) {
            Ok(dump) => info!("Stats:\n{}", dump),
            Err(e) => warn!(error = %e, "Failed to render stats"),
        }

        for (key, value) in self.metrics() {
            sink.send(key, value);
        }
    }
}

pub struct StatsCollector<R> {
    runner: Arc<R>,
    count_query: CommandConfig,
}

impl<R: ToolRunner> StatsCollector<R> {
    pub fn new(runner: Arc<R>, count_query: CommandConfig) -> Self {
        Self {
            runner,
            count_query,
        }
    }

    /// Build a fresh snapshot. Count query failures leave the database
    /// counts empty; store errors are propagated.
    pub async fn collect(
        &self,
        engine: &mut ProcessSupervisor,
        store: &ArchiveStore,
        now: SystemTime,
    ) -> Result<StatsSnapshot> {
        let counts = match self.query_counts(engine).await {
            Ok(counts) => Some(counts),
            Err(e) => {
                warn!(error = %e, "Could not read database counts");
                None
            }
        };

        let artifacts = store.list()?;
        let newest = artifacts.first();
        let last_backup = newest
            .map(|artifact| artifact.modified)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let age = now
            .duration_since(last_backup)
            .unwrap_or_default()
            .as_secs_f64();

        Ok(StatsSnapshot {
            documents: counts.map(|c| c.documents),
            collections: counts.map(|c| c.collections),
            databases: counts.map(|c| c.databases),
            last_backup_size: newest.map(|artifact| artifact.size),
            age,
            backups_count: artifacts.len(),
        })
    }

    async fn query_counts(&self, engine: &mut ProcessSupervisor) -> Result<DbCounts> {
        engine.ensure_started().await?;

        let output = self.runner.run(&self.count_query.render(&[])).await?;
        if !output.success() {
            return Err(DaemonError::StatsQuery(output.failure_detail()));
        }
        DbCounts::parse(&output.stdout)
    }
}
