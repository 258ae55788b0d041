//! Delegated execution.
//!
//! The orchestrator never performs task work itself. It hands each task to an
//! [`AgentRunner`] and learns from the [`RunReport`] that comes back.

use crate::registry::Agent;
use crate::task::Task;
use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Environment variable carrying the task id for command runners.
pub const ENV_TASK_ID: &str = "AUTOPILOT_TASK_ID";

/// Environment variable carrying the task description for command runners.
pub const ENV_TASK_DESCRIPTION: &str = "AUTOPILOT_TASK_DESCRIPTION";

/// Environment variable carrying the agent name for command runners.
pub const ENV_AGENT: &str = "AUTOPILOT_AGENT";

/// What an agent reported about one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Self-reported success.
    pub success: bool,
    /// Number of errors encountered along the way.
    pub error_count: u32,
    /// Free-form summary.
    pub notes: Option<String>,
}

impl RunReport {
    /// A clean success.
    #[must_use]
    pub const fn success() -> Self {
        Self { success: true, error_count: 0, notes: None }
    }

    /// A reported failure.
    #[must_use]
    pub fn failure(notes: impl Into<String>) -> Self {
        Self { success: false, error_count: 0, notes: Some(notes.into()) }
    }

    /// Sets the error count.
    #[must_use]
    pub const fn with_errors(mut self, error_count: u32) -> Self {
        self.error_count = error_count;
        self
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Opaque execution capability of an agent.
///
/// An `Err` means the execution itself broke down (as opposed to the agent
/// reporting failure) and is recorded as a failure scoring zero.
#[async_trait]
pub trait AgentRunner: Send + Sync + fmt::Debug {
    /// Performs `task` as `agent`.
    async fn run(&self, task: &Task, agent: &Agent) -> anyhow::Result<RunReport>;
}

/// Runner that waits a fixed delay and reports success.
///
/// Descriptions matching the optional failure pattern report failure instead.
#[derive(Debug, Clone)]
pub struct SimulatedRunner {
    delay: Duration,
    failure_pattern: Option<Regex>,
}

impl SimulatedRunner {
    /// Creates a runner that always succeeds after `delay`.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay, failure_pattern: None }
    }

    /// Makes descriptions matching `pattern` (case-insensitive) fail.
    ///
    /// # Errors
    /// Returns an error if the pattern is not a valid regex.
    pub fn with_failure_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.failure_pattern = Some(Regex::new(&format!("(?i){}", pattern))?);
        Ok(self)
    }
}

impl Default for SimulatedRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl AgentRunner for SimulatedRunner {
    async fn run(&self, task: &Task, agent: &Agent) -> anyhow::Result<RunReport> {
        debug!(task_id = %task.id, agent = %agent.name, delay_ms = self.delay.as_millis(), "Simulating task");
        tokio::time::sleep(self.delay).await;

        if self.failure_pattern.as_ref().is_some_and(|p| p.is_match(&task.description)) {
            return Ok(RunReport::failure("simulated failure").with_errors(1));
        }
        Ok(RunReport::success().with_notes(format!("{} completed {}", agent.name, task.id)))
    }
}

/// Runner that executes a shell command per task.
///
/// The task is exposed through [`ENV_TASK_ID`], [`ENV_TASK_DESCRIPTION`] and
/// [`ENV_AGENT`]. Exit status maps to success; stderr lines mentioning
/// "error" count as errors. The child is killed if the execution is dropped,
/// e.g. on timeout.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    command: String,
    working_dir: Option<PathBuf>,
}

impl CommandRunner {
    /// Creates a runner for `command`.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), working_dir: None }
    }

    /// Runs the command in `dir`.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl AgentRunner for CommandRunner {
    async fn run(&self, task: &Task, agent: &Agent) -> anyhow::Result<RunReport> {
        #[cfg(unix)]
        let (shell_cmd, shell_arg) = ("sh", "-c");
        #[cfg(windows)]
        let (shell_cmd, shell_arg) = ("cmd", "/c");

        let mut cmd = Command::new(shell_cmd);
        cmd.arg(shell_arg)
            .arg(&self.command)
            .env(ENV_TASK_ID, &task.id)
            .env(ENV_TASK_DESCRIPTION, &task.description)
            .env(ENV_AGENT, &agent.name)
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to spawn '{}'", self.command))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let error_count = stderr.lines().filter(|l| l.to_lowercase().contains("error")).count();
        let exit_code = output.status.code().unwrap_or(-1);

        debug!(task_id = %task.id, agent = %agent.name, exit_code, error_count, "Command finished");

        let notes = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map_or_else(|| format!("exit code {}", exit_code), |l| l.trim().to_string());

        Ok(RunReport {
            success: output.status.success(),
            error_count: u32::try_from(error_count).unwrap_or(u32::MAX),
            notes: Some(notes),
        })
    }
}
