//! Error types for the backup daemon.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine start failure: {0}")]
    EngineStart(String),

    #[error("Failed to launch {program}: {source}")]
    ToolLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dump to {} failed: {}", .path.display(), .detail)]
    DumpFailed { path: PathBuf, detail: String },

    #[error("Restore of {} failed: {}", .path.display(), .detail)]
    RestoreFailed { path: PathBuf, detail: String },

    #[error("Stats query failed: {0}")]
    StatsQuery(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
