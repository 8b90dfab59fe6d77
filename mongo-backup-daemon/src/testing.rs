//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

use crate::config::{CommandConfig, EngineConfig};
use crate::daemon::clock::Clock;
use crate::engine::ProcessSupervisor;
use crate::stats::sink::MetricsSink;
use crate::tools::{CommandSpec, ToolOutput, ToolRunner};
use crate::utils::errors::{DaemonError, Result};

pub const SETTLE: Duration = Duration::from_millis(50);

/// Write a fake artifact with the given modification time (Unix seconds).
pub fn write_artifact(dir: &Path, name: &str, mtime_secs: u64) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, name.as_bytes()).unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs))
        .unwrap();
    path
}

fn engine_config(root: &Path, script: &str) -> EngineConfig {
    EngineConfig {
        command: CommandConfig::new("sh", &["-c", script, "{data_dir}"]),
        data_dir: root.join("data"),
        log_file: root.join("logs").join("engine.log"),
        settle_delay_secs: 0,
    }
}

/// An "engine" that stays alive until killed.
pub fn sleeping_engine(root: &Path) -> ProcessSupervisor {
    ProcessSupervisor::new(&engine_config(root, "exec sleep 60")).with_settle_delay(SETTLE)
}

/// An "engine" that exits immediately.
pub fn failing_engine(root: &Path) -> ProcessSupervisor {
    ProcessSupervisor::new(&engine_config(root, "exit 3")).with_settle_delay(SETTLE)
}

pub fn ok() -> ToolOutput {
    ToolOutput {
        code: Some(0),
        ..Default::default()
    }
}

pub fn ok_with_stdout(stdout: &str) -> ToolOutput {
    ToolOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        ..Default::default()
    }
}

pub fn exit(code: i32, stderr: &str) -> ToolOutput {
    ToolOutput {
        code: Some(code),
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

type Handler = Box<dyn Fn(&CommandSpec, usize) -> ToolOutput + Send + Sync>;

/// [`ToolRunner`] answering from per-program closures. The closure receives
/// the command and the zero-based call index for that program. Programs
/// without a handler fail to launch. A program with a delay takes that long
/// to exit after its handler has run.
#[derive(Default)]
pub struct ScriptedRunner {
    handlers: HashMap<String, Handler>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, program: &str, handler: F) -> Self
    where
        F: Fn(&CommandSpec, usize) -> ToolOutput + Send + Sync + 'static,
    {
        self.handlers.insert(program.to_string(), Box::new(handler));
        self
    }

    pub fn delay(mut self, program: &str, delay: Duration) -> Self {
        self.delays.insert(program.to_string(), delay);
        self
    }

    pub fn calls(&self, program: &str) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program == program)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, program: &str) -> usize {
        self.calls(program).len()
    }
}

impl ToolRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> Result<ToolOutput> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.iter().filter(|c| c.program == command.program).count();
            calls.push(command.clone());
            index
        };

        let Some(handler) = self.handlers.get(&command.program) else {
            return Err(DaemonError::ToolLaunch {
                program: command.program.clone(),
                source: std::io::Error::new(ErrorKind::NotFound, "not scripted"),
            });
        };
        let output = handler(command, index);

        if let Some(delay) = self.delays.get(&command.program) {
            tokio::time::sleep(*delay).await;
        }
        Ok(output)
    }
}

/// Dump handler that writes `bytes` to the `--archive=` path.
pub fn dump_writing(bytes: &'static [u8]) -> impl Fn(&CommandSpec, usize) -> ToolOutput {
    move |command, _| {
        let archive = command.flag_value("--archive").unwrap();
        std::fs::write(archive, bytes).unwrap();
        ok()
    }
}

/// Restore handler that drops a marker file into `data_dir`.
pub fn restore_into(data_dir: PathBuf) -> impl Fn(&CommandSpec, usize) -> ToolOutput {
    move |command, _| {
        let archive = command.flag_value("--archive").unwrap_or_default();
        std::fs::write(data_dir.join("restored-from"), archive).unwrap();
        ok()
    }
}

/// Clock that never waits: sleeping advances the current time instantly.
pub struct ManualClock {
    now: Mutex<SystemTime>,
    sleeps: Mutex<Vec<Duration>>,
    stop_after: Option<(usize, CancellationToken)>,
}

impl ManualClock {
    pub fn at(now: SystemTime) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
            stop_after: None,
        }
    }

    /// Cancel `token` once `sleeps` sleeps have happened.
    pub fn stop_after(mut self, sleeps: usize, token: CancellationToken) -> Self {
        self.stop_after = Some((sleeps, token));
        self
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        let count = {
            let mut sleeps = self.sleeps.lock().unwrap();
            sleeps.push(duration);
            sleeps.len()
        };
        self.advance(duration);

        if let Some((limit, token)) = &self.stop_after {
            if count >= *limit {
                token.cancel();
            }
        }
        tokio::task::yield_now().await;
    }
}

/// Sink that remembers every emission.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(String, f64)>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<(String, f64)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self, key: &str) -> Option<f64> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

impl MetricsSink for RecordingSink {
    fn send(&self, key: &str, value: f64) {
        self.sent.lock().unwrap().push((key.to_string(), value));
    }
}
