//! Learning feedback loop.
//!
//! Executes one task on the best available agent, turns the outcome into a
//! score, and folds that score back into the agent's performance.

use crate::config::ScoringConfig;
use crate::error::Result;
use crate::registry::{Agent, AgentRegistry, MAX_SCORE, MIN_SCORE};
use crate::runners::{AgentRunner, RunReport};
use crate::task::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Classified result of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Reported success, no errors, score at or above the threshold.
    Success,
    /// Reported success but fell short of the success conditions.
    Partial,
    /// Reported failure, raised an error, or timed out.
    Failure,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Partial => f.write_str("partial"),
            Self::Failure => f.write_str("failure"),
        }
    }
}

/// Immutable record of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Executed task.
    pub task_id: String,
    /// Agent that ran it; empty if none was resolved.
    pub agent: String,
    /// Outcome score in [0, 100].
    pub score: f64,
    /// Wall-clock execution time in milliseconds.
    pub duration_ms: u64,
    /// Classified outcome.
    pub outcome: Outcome,
    /// Execution error, if the run broke down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Agent-supplied notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Completion time.
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Creates a result finished now.
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        score: f64,
        duration: Duration,
        outcome: Outcome,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            score: score.clamp(MIN_SCORE, MAX_SCORE),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            outcome,
            error: None,
            notes: None,
            finished_at: Utc::now(),
        }
    }

    /// A zero-score failure carrying `error`.
    #[must_use]
    pub fn failed(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(task_id, agent, 0.0, duration, Outcome::Failure);
        result.error = Some(error.into());
        result
    }

    /// Execution time.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Whether the task counts as completed rather than failed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.outcome != Outcome::Failure
    }
}

/// Scores a report: success points, plus speed points scaled by how far the
/// run stayed within the target duration, minus a penalty per error.
#[must_use]
pub fn compute_score(scoring: &ScoringConfig, report: &RunReport, duration: Duration) -> f64 {
    let success_points = if report.success { scoring.success_weight } else { 0.0 };

    let secs = duration.as_secs_f64();
    let speed_ratio = if secs <= scoring.target_duration_secs {
        1.0
    } else {
        scoring.target_duration_secs / secs
    };

    let penalty = scoring.error_penalty * f64::from(report.error_count);
    scoring
        .speed_weight
        .mul_add(speed_ratio, success_points - penalty)
        .clamp(MIN_SCORE, MAX_SCORE)
}

/// Classifies a report given its score.
#[must_use]
pub fn classify(scoring: &ScoringConfig, report: &RunReport, score: f64) -> Outcome {
    if !report.success {
        Outcome::Failure
    } else if report.error_count == 0 && score >= scoring.success_threshold {
        Outcome::Success
    } else {
        Outcome::Partial
    }
}

/// Runs tasks through agents and feeds the scores back into the registry.
#[derive(Debug, Clone)]
pub struct LearningLoop {
    registry: Arc<AgentRegistry>,
    runner: Arc<dyn AgentRunner>,
    scoring: ScoringConfig,
    timeout: Option<Duration>,
}

impl LearningLoop {
    /// Creates a learning loop with no per-task timeout.
    #[must_use]
    pub fn new(registry: Arc<AgentRegistry>, runner: Arc<dyn AgentRunner>, scoring: ScoringConfig) -> Self {
        Self { registry, runner, scoring, timeout: None }
    }

    /// Bounds each delegated execution; expiry is a zero-score failure.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The registry this loop updates.
    #[must_use]
    pub const fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Executes `task` on the best ready agent and learns from the outcome.
    ///
    /// The agent is acquired for the duration of the run and released
    /// afterwards whatever the outcome. Runner errors and timeouts are
    /// recorded in the returned result, never propagated.
    ///
    /// # Errors
    /// Returns `NoAgentAvailable` if no suitable agent is ready; nothing is
    /// executed in that case. Registry bookkeeping errors are propagated
    /// after the agent has been released.
    pub async fn execute_with_learning(&self, task: &Task) -> Result<ExecutionResult> {
        let agent = self.registry.acquire_best(task).await?;
        let result = self.run_and_score(task, &agent).await;

        let updated = self.registry.update_score(&agent.name, &result).await;
        let released = self.registry.release(&agent.name).await;
        updated?;
        released?;

        info!(
            task_id = %result.task_id,
            agent = %result.agent,
            outcome = %result.outcome,
            score = result.score,
            duration_ms = result.duration_ms,
            "Task executed"
        );
        Ok(result)
    }

    async fn run_and_score(&self, task: &Task, agent: &Agent) -> ExecutionResult {
        let started = Instant::now();

        // The runner gets its own task so a panic surfaces as a JoinError
        // instead of unwinding through the execution loop.
        let runner = Arc::clone(&self.runner);
        let (owned_task, owned_agent) = (task.clone(), agent.clone());
        let mut handle = tokio::spawn(async move { runner.run(&owned_task, &owned_agent).await });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    Ok(Err(anyhow::anyhow!("timed out after {:.1}s", limit.as_secs_f64())))
                }
            },
            None => handle.await,
        };
        let report = match joined {
            Ok(report) => report,
            Err(e) if e.is_panic() => Err(anyhow::anyhow!("agent panicked")),
            Err(e) => Err(anyhow::anyhow!("agent run aborted: {}", e)),
        };
        let duration = started.elapsed();

        match report {
            Ok(report) => {
                let score = compute_score(&self.scoring, &report, duration);
                let outcome = classify(&self.scoring, &report, score);
                let mut result = ExecutionResult::new(&task.id, &agent.name, score, duration, outcome);
                result.notes = report.notes;
                result
            }
            Err(e) => {
                warn!(task_id = %task.id, agent = %agent.name, error = %e, "Delegated execution failed");
                ExecutionResult::failed(&task.id, &agent.name, duration, format!("{:#}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::registry::AgentState;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct ScriptedRunner {
        delay: Duration,
        report: Option<RunReport>,
    }

    #[async_trait]
    impl AgentRunner for ScriptedRunner {
        async fn run(&self, _task: &Task, _agent: &Agent) -> anyhow::Result<RunReport> {
            tokio::time::sleep(self.delay).await;
            self.report.clone().ok_or_else(|| anyhow::anyhow!("agent crashed"))
        }
    }

    async fn registry() -> Arc<AgentRegistry> {
        let registry = Arc::new(AgentRegistry::default());
        registry.register(Agent::new("X", ["ui"], 80.0)).await;
        registry
    }

    fn learning(registry: Arc<AgentRegistry>, delay: Duration, report: Option<RunReport>) -> LearningLoop {
        LearningLoop::new(registry, Arc::new(ScriptedRunner { delay, report }), ScoringConfig::default())
    }

    #[test]
    fn test_score_composition() {
        let scoring = ScoringConfig::default();
        let fast = compute_score(&scoring, &RunReport::success(), Duration::from_secs(1));
        assert!((fast - 100.0).abs() < 1e-9);

        let slow = compute_score(&scoring, &RunReport::success(), Duration::from_secs(120));
        assert!((slow - 85.0).abs() < 1e-9);

        let errors = compute_score(&scoring, &RunReport::success().with_errors(2), Duration::from_secs(1));
        assert!((errors - 80.0).abs() < 1e-9);

        let failed = compute_score(&scoring, &RunReport::failure("no").with_errors(5), Duration::from_secs(1));
        assert!(failed.abs() < 1e-9);
    }

    #[test]
    fn test_classification() {
        let scoring = ScoringConfig::default();
        assert_eq!(classify(&scoring, &RunReport::success(), 100.0), Outcome::Success);
        assert_eq!(classify(&scoring, &RunReport::success(), 50.0), Outcome::Partial);
        assert_eq!(classify(&scoring, &RunReport::success().with_errors(1), 90.0), Outcome::Partial);
        assert_eq!(classify(&scoring, &RunReport::failure("x"), 30.0), Outcome::Failure);
    }

    #[tokio::test]
    async fn test_success_updates_score_and_releases() {
        let registry = registry().await;
        let learning = learning(Arc::clone(&registry), Duration::ZERO, Some(RunReport::success()));

        let result = learning.execute_with_learning(&Task::new("t1", "Build form", 1).with_tag("ui")).await.unwrap();
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.agent, "X");
        assert!(result.is_completed());

        let agent = registry.get("X").await.unwrap();
        assert_eq!(agent.state, AgentState::Ready);
        assert!((agent.performance_score - 84.0).abs() < 1e-6);
        assert_eq!(agent.stats.successes, 1);
    }

    #[tokio::test]
    async fn test_runner_error_scores_zero() {
        let registry = registry().await;
        let learning = learning(Arc::clone(&registry), Duration::ZERO, None);

        let result = learning.execute_with_learning(&Task::new("t1", "Build form", 1)).await.unwrap();
        assert_eq!(result.outcome, Outcome::Failure);
        assert!(result.score.abs() < 1e-9);
        assert!(result.error.as_deref().unwrap().contains("agent crashed"));

        let agent = registry.get("X").await.unwrap();
        assert_eq!(agent.state, AgentState::Ready);
        assert!((agent.performance_score - 64.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_timeout_is_failure_with_zero_score() {
        let registry = registry().await;
        let learning = learning(Arc::clone(&registry), Duration::from_secs(5), Some(RunReport::success()))
            .with_timeout(Some(Duration::from_millis(20)));

        let result = learning.execute_with_learning(&Task::new("t1", "Slow task", 1)).await.unwrap();
        assert_eq!(result.outcome, Outcome::Failure);
        assert!(result.score.abs() < 1e-9);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        assert!(result.duration() < Duration::from_secs(5));
        assert_eq!(registry.busy_count().await, 0);
    }

    #[derive(Debug)]
    struct PanickingRunner;

    #[async_trait]
    impl AgentRunner for PanickingRunner {
        async fn run(&self, task: &Task, _agent: &Agent) -> anyhow::Result<RunReport> {
            panic!("runner blew up on {}", task.id)
        }
    }

    #[tokio::test]
    async fn test_runner_panic_is_failure_and_releases() {
        let registry = registry().await;
        let learning = LearningLoop::new(Arc::clone(&registry), Arc::new(PanickingRunner), ScoringConfig::default());

        let result = learning.execute_with_learning(&Task::new("bad", "Build form", 1)).await.unwrap();
        assert_eq!(result.outcome, Outcome::Failure);
        assert!(result.score.abs() < 1e-9);
        assert!(result.error.as_deref().unwrap().contains("panicked"));

        let agent = registry.get("X").await.unwrap();
        assert_eq!(agent.state, AgentState::Ready);
        assert_eq!(agent.stats.failures, 1);
    }

    #[tokio::test]
    async fn test_no_agent_fails_fast() {
        let registry = registry().await;
        registry.acquire("X").await.unwrap();
        let learning = learning(Arc::clone(&registry), Duration::ZERO, Some(RunReport::success()));

        let err = learning.execute_with_learning(&Task::new("t1", "x", 1)).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::NoAgentAvailable(_)));
        assert_eq!(registry.get("X").await.unwrap().stats.executions, 0);
    }
}
