//! Status surface: recent results, status snapshots and their file exports.

use crate::error::Result;
use crate::learning::ExecutionResult;
use crate::orchestrator::LifecycleState;
use crate::queue::QueueMetrics;
use crate::registry::{Agent, AgentState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-agent line of a status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub tags: Vec<String>,
    pub state: AgentState,
    pub performance_score: f64,
    pub executions: u64,
    pub successes: u64,
    pub partials: u64,
    pub failures: u64,
}

impl From<&Agent> for AgentStatus {
    fn from(agent: &Agent) -> Self {
        Self {
            name: agent.name.clone(),
            tags: agent.tags.iter().cloned().collect(),
            state: agent.state,
            performance_score: agent.performance_score,
            executions: agent.stats.executions,
            successes: agent.stats.successes,
            partials: agent.stats.partials,
            failures: agent.stats.failures,
        }
    }
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub state: LifecycleState,
    pub queue: QueueMetrics,
    pub agents: Vec<AgentStatus>,
    /// Most recent results, newest last.
    pub recent_results: Vec<ExecutionResult>,
    /// Results recorded since the orchestrator was created.
    pub total_executions: u64,
    pub generated_at: DateTime<Utc>,
}

impl OrchestratorStatus {
    /// Writes the snapshot as pretty JSON, replacing the file atomically.
    ///
    /// # Errors
    /// Returns an error if serialization or any file operation fails.
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Reads a snapshot written by [`save_to_file`](Self::save_to_file).
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Average performance score across agents.
    #[must_use]
    pub fn average_score(&self) -> Option<f64> {
        if self.agents.is_empty() {
            return None;
        }
        let total: f64 = self.agents.iter().map(|a| a.performance_score).sum();
        Some(total / self.agents.len() as f64)
    }
}

#[derive(Debug, Default)]
struct BoardState {
    recent: VecDeque<ExecutionResult>,
    total: u64,
}

/// Keeps the latest execution results and mirrors them to disk.
#[derive(Debug)]
pub struct StatusBoard {
    state: Mutex<BoardState>,
    limit: usize,
    status_file: Option<PathBuf>,
    execution_log: Option<PathBuf>,
}

impl StatusBoard {
    /// Creates a board retaining `limit` results with no file exports.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { state: Mutex::new(BoardState::default()), limit, status_file: None, execution_log: None }
    }

    /// Exports status snapshots to `path`.
    #[must_use]
    pub fn with_status_file(mut self, path: Option<PathBuf>) -> Self {
        self.status_file = path;
        self
    }

    /// Appends every result to the JSON-lines file at `path`.
    #[must_use]
    pub fn with_execution_log(mut self, path: Option<PathBuf>) -> Self {
        self.execution_log = path;
        self
    }

    /// Records a result.
    ///
    /// A failing log write is reported and otherwise ignored; recording
    /// never fails.
    pub async fn record(&self, result: ExecutionResult) {
        if let Some(path) = &self.execution_log {
            if let Err(e) = append_json_line(path, &result).await {
                warn!(path = %path.display(), error = %e, "Failed to append execution log");
            }
        }

        let mut state = self.state.lock().await;
        state.total += 1;
        state.recent.push_back(result);
        while state.recent.len() > self.limit {
            state.recent.pop_front();
        }
    }

    /// Recent results, oldest first.
    pub async fn recent(&self) -> Vec<ExecutionResult> {
        self.state.lock().await.recent.iter().cloned().collect()
    }

    /// Results recorded so far.
    pub async fn total(&self) -> u64 {
        self.state.lock().await.total
    }

    /// Writes `status` to the status file, if one is configured.
    pub async fn export(&self, status: &OrchestratorStatus) {
        let Some(path) = &self.status_file else {
            return;
        };
        match status.save_to_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Status exported"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to export status"),
        }
    }
}

async fn append_json_line(path: &Path, result: &ExecutionResult) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(result)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Reads every result from a JSON-lines execution log, skipping bad lines.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_execution_log(path: &Path) -> Result<Vec<ExecutionResult>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::Outcome;
    use std::time::Duration;
    use tempfile::TempDir;

    fn result(id: &str) -> ExecutionResult {
        ExecutionResult::new(id, "X", 90.0, Duration::from_millis(5), Outcome::Success)
    }

    #[tokio::test]
    async fn test_recent_results_are_bounded() {
        let board = StatusBoard::new(2);
        board.record(result("a")).await;
        board.record(result("b")).await;
        board.record(result("c")).await;

        let ids: Vec<String> = board.recent().await.into_iter().map(|r| r.task_id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(board.total().await, 3);
    }

    #[tokio::test]
    async fn test_execution_log_appends_lines() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("metrics").join("executions.log");
        let board = StatusBoard::new(10).with_execution_log(Some(log.clone()));

        board.record(result("a")).await;
        board.record(result("b")).await;

        let entries = read_execution_log(&log).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].task_id, "b");
    }

    #[tokio::test]
    async fn test_status_file_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("status.json");
        let board = StatusBoard::new(10).with_status_file(Some(path.clone()));

        let status = OrchestratorStatus {
            state: LifecycleState::Running,
            queue: QueueMetrics { pending: 2, in_progress: 1, completed: 3, failed: 0 },
            agents: vec![AgentStatus::from(&Agent::new("X", ["ui"], 80.0))],
            recent_results: vec![result("a")],
            total_executions: 1,
            generated_at: Utc::now(),
        };
        board.export(&status).await;

        let loaded = OrchestratorStatus::load_from_file(&path).unwrap();
        assert_eq!(loaded, status);
        assert_eq!(loaded.average_score(), Some(80.0));
    }
}
