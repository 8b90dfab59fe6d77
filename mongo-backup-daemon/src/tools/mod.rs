//! External tool invocation.
//!
//! Every external command (dump, restore, count query, remediation) goes
//! through [`ToolRunner`], which returns a structured [`ToolOutput`] instead
//! of treating a non-zero exit as an error. Callers branch on
//! [`ToolOutput::success`] themselves.

use std::future::Future;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::config::CommandConfig;
use crate::utils::errors::{DaemonError, Result};

/// Longest stderr excerpt carried into error messages.
const DETAIL_LIMIT: usize = 400;

/// A fully rendered command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Value of the first `--name=value` style argument.
    pub fn flag_value(&self, name: &str) -> Option<&str> {
        let prefix = format!("{name}=");
        self.args.iter().find_map(|arg| arg.strip_prefix(prefix.as_str()))
    }
}

impl CommandConfig {
    /// Substitute `{key}` placeholders in every argument.
    pub fn render(&self, vars: &[(&str, &str)]) -> CommandSpec {
        let args = self
            .args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{key}}}"), value)
                })
            })
            .collect();

        CommandSpec {
            program: self.program.clone(),
            args,
        }
    }
}

/// Result of running an external command to completion.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short human-readable explanation of a failed run.
    pub fn failure_detail(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };

        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            return status;
        }

        let tail: String = if stderr.len() > DETAIL_LIMIT {
            let mut start = stderr.len() - DETAIL_LIMIT;
            while !stderr.is_char_boundary(start) {
                start += 1;
            }
            format!("...{}", &stderr[start..])
        } else {
            stderr.to_string()
        };
        format!("{status}: {tail}")
    }
}

/// Runs external commands.
pub trait ToolRunner {
    fn run(&self, command: &CommandSpec) -> impl Future<Output = Result<ToolOutput>>;
}

/// [`ToolRunner`] backed by real subprocesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec) -> Result<ToolOutput> {
        debug!(program = %command.program, "Running external command");

        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DaemonError::ToolLaunch {
                program: command.program.clone(),
                source,
            })?;

        let result = ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(program = %command.program, code = ?result.code, "External command finished");
        Ok(result)
    }
}
