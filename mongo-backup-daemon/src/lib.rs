//! MongoDB Backup Daemon Library
//!
//! Periodically dumps a live database, verifies every dump by restoring it
//! into a disposable local engine, prunes old dumps and reports health
//! metrics to Graphite.

pub mod archive;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod executor;
pub mod stats;
pub mod tools;
pub mod utils;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::Config;
pub use daemon::Daemon;
pub use utils::errors::DaemonError;
pub type Result<T> = std::result::Result<T, DaemonError>;
