//! Metrics sinks.
//!
//! Emission is fire-and-forget: a sink must never block or fail the caller.
//! [`GraphiteSink`] speaks the Graphite plaintext protocol over TCP from a
//! detached task and only logs delivery errors.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::MetricsConfig;

pub trait MetricsSink {
    fn send(&self, key: &str, value: f64);
}

impl<T: MetricsSink + ?Sized> MetricsSink for Arc<T> {
    fn send(&self, key: &str, value: f64) {
        (**self).send(key, value)
    }
}

impl<T: MetricsSink + ?Sized> MetricsSink for Box<T> {
    fn send(&self, key: &str, value: f64) {
        (**self).send(key, value)
    }
}

/// Build the sink described by `config`: Graphite when a host is set,
/// otherwise a sink that only logs.
pub fn from_config(config: &MetricsConfig) -> Box<dyn MetricsSink> {
    match &config.host {
        Some(host) => Box::new(GraphiteSink::new(
            format!("{}:{}", host, config.port),
            &config.prefix,
            Duration::from_secs(config.timeout_secs),
        )),
        None => Box::new(LogSink),
    }
}

/// Logs metrics at debug level instead of shipping them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn send(&self, key: &str, value: f64) {
        debug!(key, value, "metric");
    }
}

#[derive(Debug, Clone)]
pub struct GraphiteSink {
    addr: String,
    prefix: String,
    timeout: Duration,
}

impl GraphiteSink {
    pub fn new(addr: impl Into<String>, prefix: &str, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            prefix: prefix.trim_end_matches('.').to_string(),
            timeout,
        }
    }

    /// `<prefix>.<key> <value> <timestamp>\n`
    pub fn line(&self, key: &str, value: f64, at: SystemTime) -> String {
        let timestamp = at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let path = if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.prefix, key)
        };
        format!("{path} {value} {timestamp}\n")
    }
}

impl MetricsSink for GraphiteSink {
    fn send(&self, key: &str, value: f64) {
        let line = self.line(key, value, SystemTime::now());

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key, "No async runtime, dropping metric");
            return;
        };

        let addr = self.addr.clone();
        let timeout = self.timeout;
        let key = key.to_string();
        handle.spawn(async move {
            let delivery = async {
                let mut stream = TcpStream::connect(&addr).await?;
                stream.write_all(line.as_bytes()).await?;
                stream.shutdown().await
            };

            match tokio::time::timeout(timeout, delivery).await {
                Ok(Ok(())) => debug!(key = %key, "Metric sent"),
                Ok(Err(e)) => warn!(key = %key, addr = %addr, error = %e, "Failed to send metric"),
                Err(_) => warn!(key = %key, addr = %addr, "Timed out sending metric"),
            }
        });
    }
}
