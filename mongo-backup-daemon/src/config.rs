//! Configuration management for the backup daemon.
//!
//! Loads configuration from a TOML file (or built-in defaults) with
//! environment variable overrides. A `.env` file in the working directory is
//! honoured before the environment is read.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::errors::{DaemonError, Result};

/// Prints `{databases, collections, documents}` as one JSON line.
pub const COUNT_SCRIPT: &str = "let r={databases:0,collections:0,documents:0};\
db.adminCommand({listDatabases:1}).databases.forEach(function(d){r.databases++;\
var s=db.getSiblingDB(d.name);s.getCollectionNames().forEach(function(c){r.collections++;\
r.documents+=s.getCollection(c).countDocuments({});});});print(JSON.stringify(r));";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string of the live database (usually from `MONGODB_URI`)
    #[serde(default)]
    pub uri: String,
}

/// An external program and its argument template.
///
/// Arguments may contain `{name}` placeholders which are substituted at
/// invocation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine command line; `{data_dir}` is replaced by `data_dir`
    #[serde(default = "default_engine_command")]
    pub command: CommandConfig,

    /// Data directory the local engine restores into
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Engine log file, rotated to `<file>.1` on every start
    #[serde(default = "default_engine_log")]
    pub log_file: PathBuf,

    /// Wait after start/stop in place of a readiness probe
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Destination directory for backup artifacts
    #[serde(default = "default_backups_dir")]
    pub dir: PathBuf,

    /// Number of newest artifacts kept by retention
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Backup period in seconds (default: one day)
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Offset within the period at which a backup becomes due
    #[serde(default = "default_fraction_secs")]
    pub fraction_secs: u64,

    /// Dump command; placeholders `{archive}` and `{uri}`
    #[serde(default = "default_dump_command")]
    pub dump: CommandConfig,

    /// Restore command; placeholder `{archive}`
    #[serde(default = "default_restore_command")]
    pub restore: CommandConfig,

    /// Restore attempts before an artifact is discarded as corrupt
    #[serde(default = "default_restore_attempts")]
    pub restore_attempts: u32,

    /// Best-effort command run after a failed dump (e.g. restart a tunnel)
    #[serde(default)]
    pub remediation: Option<CommandConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Loop tick in seconds
    #[serde(default = "default_stats_interval_secs")]
    pub interval_secs: u64,

    /// Count query against the local engine, must print a JSON object
    #[serde(default = "default_count_command")]
    pub count_query: CommandConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Graphite host; metrics are only logged when unset
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_graphite_port")]
    pub port: u16,

    /// Namespace prefix prepended to every key
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,

    #[serde(default = "default_metrics_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_engine_command() -> CommandConfig {
    CommandConfig::new("mongod", &["--dbpath", "{data_dir}"])
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_engine_log() -> PathBuf {
    PathBuf::from("./logs/mongod.log")
}

fn default_settle_delay_secs() -> u64 {
    5
}

fn default_backups_dir() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_max_backups() -> usize {
    7
}

fn default_period_secs() -> u64 {
    60 * 60 * 24
}

fn default_fraction_secs() -> u64 {
    60 * 150 // 02:30 UTC
}

fn default_dump_command() -> CommandConfig {
    CommandConfig::new("mongodump", &["--gzip", "--archive={archive}", "--uri={uri}"])
}

fn default_restore_command() -> CommandConfig {
    CommandConfig::new("mongorestore", &["--gzip", "--archive={archive}"])
}

fn default_restore_attempts() -> u32 {
    10
}

fn default_stats_interval_secs() -> u64 {
    5 * 60
}

fn default_count_command() -> CommandConfig {
    CommandConfig::new("mongosh", &["--quiet", "--eval", COUNT_SCRIPT])
}

fn default_graphite_port() -> u16 {
    2003
}

fn default_metrics_prefix() -> String {
    "mongo.backup".to_string()
}

fn default_metrics_timeout_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            data_dir: default_data_dir(),
            log_file: default_engine_log(),
            settle_delay_secs: default_settle_delay_secs(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backups_dir(),
            max_backups: default_max_backups(),
            period_secs: default_period_secs(),
            fraction_secs: default_fraction_secs(),
            dump: default_dump_command(),
            restore: default_restore_command(),
            restore_attempts: default_restore_attempts(),
            remediation: None,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_stats_interval_secs(),
            count_query: default_count_command(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_graphite_port(),
            prefix: default_metrics_prefix(),
            timeout_secs: default_metrics_timeout_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise defaults, then apply the
    /// process environment (after reading `.env`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup("MONGODB_URI") {
            self.database.uri = uri;
        }
        if let Some(dir) = lookup("BACKUPS_DIR") {
            self.backup.dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("MONGO_DATA_DIR") {
            self.engine.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(host) = lookup("GRAPHITE_HOST") {
            self.metrics.host = Some(host).filter(|h| !h.is_empty());
        }
        if let Some(port) = lookup("GRAPHITE_PORT").and_then(|v| v.parse().ok()) {
            self.metrics.port = port;
        }
        if let Some(prefix) = lookup("GRAPHITE_PREFIX") {
            self.metrics.prefix = prefix;
        }
    }

    /// Reject configurations the daemon cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.database.uri.trim().is_empty() {
            return Err(DaemonError::Config(
                "database URI is not set (MONGODB_URI)".into(),
            ));
        }
        if self.backup.max_backups == 0 {
            return Err(DaemonError::Config("backup.max_backups must be at least 1".into()));
        }
        if self.backup.period_secs == 0 {
            return Err(DaemonError::Config("backup.period_secs must be positive".into()));
        }
        if self.backup.fraction_secs >= self.backup.period_secs {
            return Err(DaemonError::Config(format!(
                "backup.fraction_secs ({}) must be smaller than backup.period_secs ({})",
                self.backup.fraction_secs, self.backup.period_secs
            )));
        }
        if self.backup.restore_attempts == 0 {
            return Err(DaemonError::Config(
                "backup.restore_attempts must be at least 1".into(),
            ));
        }
        if self.stats.interval_secs == 0 {
            return Err(DaemonError::Config("stats.interval_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats.interval_secs)
    }
}
