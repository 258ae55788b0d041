//! Agent registry with capability matching and learned performance scores.
//!
//! Agents are created from static configuration and never removed during a
//! run. Each agent is either ready or busy; acquiring an agent flips it to busy
//! under the registry's write lock, so two callers can never hold the same
//! agent at once.

use crate::config::{AgentConfig, LearningConfig};
use crate::error::{OrchestrationError, Result};
use crate::learning::{ExecutionResult, Outcome};
use crate::task::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default EMA smoothing factor.
pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.2;

/// Lower bound of a performance score.
pub const MIN_SCORE: f64 = 0.0;

/// Upper bound of a performance score.
pub const MAX_SCORE: f64 = 100.0;

/// Availability of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Free to take a task.
    Ready,
    /// Holding a task.
    Busy,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Busy => f.write_str("busy"),
        }
    }
}

/// Running execution counters for an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    /// Executions scored.
    pub executions: u64,
    /// Executions with a success outcome.
    pub successes: u64,
    /// Executions with a partial outcome.
    pub partials: u64,
    /// Executions with a failure outcome.
    pub failures: u64,
    /// Score of the latest execution.
    pub last_score: Option<f64>,
    /// When the latest execution finished.
    pub last_run_at: Option<DateTime<Utc>>,
}

/// A routable agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique name.
    pub name: String,
    /// Capability tags.
    pub tags: BTreeSet<String>,
    /// Learned performance score in [0, 100].
    pub performance_score: f64,
    /// Ready or busy.
    pub state: AgentState,
    /// Execution counters.
    #[serde(default)]
    pub stats: AgentStats,
}

impl Agent {
    /// Creates a ready agent.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, tags: I, score: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            tags: tags.into_iter().map(Into::into).collect(),
            performance_score: score.clamp(MIN_SCORE, MAX_SCORE),
            state: AgentState::Ready,
            stats: AgentStats::default(),
        }
    }

    /// Whether any of the agent's tags is in `required`.
    #[must_use]
    pub fn matches(&self, required: &BTreeSet<String>) -> bool {
        !self.tags.is_disjoint(required)
    }
}

/// Applies one exponential-moving-average step and clamps to [0, 100].
#[must_use]
pub fn ema(old: f64, observed: f64, alpha: f64) -> f64 {
    alpha.mul_add(observed, (1.0 - alpha) * old).clamp(MIN_SCORE, MAX_SCORE)
}

/// Registry of agents shared by the execution loop and status readers.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Agent>>,
    smoothing_factor: f64,
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agent_count", &self.agents.try_read().map(|a| a.len()).unwrap_or(0))
            .field("smoothing_factor", &self.smoothing_factor)
            .finish_non_exhaustive()
    }
}

impl AgentRegistry {
    /// Creates an empty registry with the given smoothing factor.
    #[must_use]
    pub fn new(smoothing_factor: f64) -> Self {
        Self { agents: RwLock::new(HashMap::new()), smoothing_factor }
    }

    /// Builds a registry from the configured roster.
    #[must_use]
    pub fn from_config(agents: &[AgentConfig], learning: &LearningConfig) -> Self {
        let map = agents
            .iter()
            .map(|cfg| {
                let score = cfg.score.unwrap_or(learning.initial_score);
                (cfg.name.clone(), Agent::new(cfg.name.clone(), cfg.tags.iter().cloned(), score))
            })
            .collect();
        Self { agents: RwLock::new(map), smoothing_factor: learning.smoothing_factor }
    }

    /// The EMA smoothing factor in use.
    #[must_use]
    pub const fn smoothing_factor(&self) -> f64 {
        self.smoothing_factor
    }

    /// Registers an agent.
    ///
    /// Returns `true` if the agent was newly registered, `false` if it replaced an existing agent.
    pub async fn register(&self, agent: Agent) -> bool {
        let name = agent.name.clone();
        debug!(agent = %name, "Registering agent");

        let mut agents = self.agents.write().await;
        let was_new = agents.insert(name.clone(), agent).is_none();
        if !was_new {
            warn!(agent = %name, "Agent replaced in registry");
        }
        was_new
    }

    /// Returns the best ready agent for `task` without acquiring it.
    ///
    /// # Errors
    /// Returns `NoAgentAvailable` if no suitable agent is ready.
    pub async fn best_match(&self, task: &Task) -> Result<String> {
        let agents = self.agents.read().await;
        select(&agents, task).map(|agent| agent.name.clone())
    }

    /// Selects and acquires the best ready agent for `task` in one step.
    ///
    /// # Errors
    /// Returns `NoAgentAvailable` if no suitable agent is ready.
    pub async fn acquire_best(&self, task: &Task) -> Result<Agent> {
        let mut agents = self.agents.write().await;
        let name = select(&agents, task)?.name.clone();
        let agent = agents
            .get_mut(&name)
            .ok_or_else(|| OrchestrationError::AgentNotFound(name.clone()))?;
        agent.state = AgentState::Busy;
        debug!(agent = %name, task_id = %task.id, score = agent.performance_score, "Agent acquired");
        Ok(agent.clone())
    }

    /// Marks a ready agent busy.
    ///
    /// # Errors
    /// Returns `AgentNotFound` for unknown names and `NoAgentAvailable` if the
    /// agent is already busy.
    pub async fn acquire(&self, name: &str) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent =
            agents.get_mut(name).ok_or_else(|| OrchestrationError::AgentNotFound(name.to_string()))?;
        if agent.state == AgentState::Busy {
            return Err(OrchestrationError::NoAgentAvailable(format!("agent '{}' is busy", name)));
        }
        agent.state = AgentState::Busy;
        debug!(agent = %name, "Agent acquired");
        Ok(())
    }

    /// Marks an agent ready again.
    ///
    /// # Errors
    /// Returns `AgentNotFound` for unknown names.
    pub async fn release(&self, name: &str) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent =
            agents.get_mut(name).ok_or_else(|| OrchestrationError::AgentNotFound(name.to_string()))?;
        agent.state = AgentState::Ready;
        debug!(agent = %name, "Agent released");
        Ok(())
    }

    /// Folds an execution score into the agent's performance score.
    ///
    /// Returns the new score.
    ///
    /// # Errors
    /// Returns `AgentNotFound` for unknown names.
    pub async fn update_score(&self, name: &str, result: &ExecutionResult) -> Result<f64> {
        let mut agents = self.agents.write().await;
        let agent =
            agents.get_mut(name).ok_or_else(|| OrchestrationError::AgentNotFound(name.to_string()))?;

        let old = agent.performance_score;
        let new = ema(old, result.score, self.smoothing_factor);
        agent.performance_score = new;

        let stats = &mut agent.stats;
        stats.executions += 1;
        match result.outcome {
            Outcome::Success => stats.successes += 1,
            Outcome::Partial => stats.partials += 1,
            Outcome::Failure => stats.failures += 1,
        }
        stats.last_score = Some(result.score);
        stats.last_run_at = Some(result.finished_at);

        info!(agent = %name, old_score = old, observed = result.score, new_score = new, "Agent score updated");
        Ok(new)
    }

    /// Returns a copy of an agent record.
    pub async fn get(&self, name: &str) -> Option<Agent> {
        self.agents.read().await.get(name).cloned()
    }

    /// All agents, sorted by name.
    pub async fn list(&self) -> Vec<Agent> {
        let agents = self.agents.read().await;
        let mut list: Vec<Agent> = agents.values().cloned().collect();
        drop(agents);
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Returns the number of registered agents.
    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Number of agents currently busy.
    pub async fn busy_count(&self) -> usize {
        self.agents.read().await.values().filter(|a| a.state == AgentState::Busy).count()
    }

    /// Agent records for checkpointing.
    pub async fn snapshot(&self) -> Vec<Agent> {
        self.list().await
    }

    /// Replaces the roster from a checkpoint; every agent comes back ready.
    pub async fn restore(&self, snapshot: Vec<Agent>) {
        let mut agents = self.agents.write().await;
        agents.clear();
        for mut agent in snapshot {
            agent.state = AgentState::Ready;
            agent.performance_score = agent.performance_score.clamp(MIN_SCORE, MAX_SCORE);
            agents.insert(agent.name.clone(), agent);
        }
        debug!(agent_count = agents.len(), "Registry restored from snapshot");
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_FACTOR)
    }
}

/// Picks the agent for `task` from `agents`.
///
/// A registered preferred agent is the only candidate. Otherwise candidates
/// are the agents sharing a tag with the task (all agents when the task has
/// no tags or nobody carries them); the ready candidate with the highest
/// score wins, ties going to the lexicographically smallest name.
fn select<'a>(agents: &'a HashMap<String, Agent>, task: &Task) -> Result<&'a Agent> {
    if let Some(preferred) = &task.preferred_agent {
        match agents.get(preferred) {
            Some(agent) if agent.state == AgentState::Ready => return Ok(agent),
            Some(_) => {
                return Err(OrchestrationError::NoAgentAvailable(format!(
                    "preferred agent '{}' is busy",
                    preferred
                )));
            }
            None => {
                warn!(task_id = %task.id, agent = %preferred, "Preferred agent not registered, matching by tags");
            }
        }
    }

    let mut candidates: Vec<&Agent> = if task.tags.is_empty() {
        agents.values().collect()
    } else {
        agents.values().filter(|a| a.matches(&task.tags)).collect()
    };
    if candidates.is_empty() && !task.tags.is_empty() {
        warn!(task_id = %task.id, tags = ?task.tags, "No agent carries the requested tags, selecting from all agents");
        candidates = agents.values().collect();
    }

    candidates
        .into_iter()
        .filter(|a| a.state == AgentState::Ready)
        .max_by(|a, b| {
            a.performance_score
                .total_cmp(&b.performance_score)
                .then_with(|| b.name.cmp(&a.name))
        })
        .ok_or_else(|| {
            OrchestrationError::NoAgentAvailable(if task.tags.is_empty() {
                "no ready agents".to_string()
            } else {
                format!("no ready agent for tags {:?}", task.tags)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::ExecutionResult;
    use std::sync::Arc;
    use std::time::Duration;

    fn result(agent: &str, score: f64, outcome: Outcome) -> ExecutionResult {
        ExecutionResult::new("task-1", agent, score, Duration::from_millis(10), outcome)
    }

    async fn ui_registry() -> AgentRegistry {
        let registry = AgentRegistry::default();
        registry.register(Agent::new("X", ["ui"], 80.0)).await;
        registry.register(Agent::new("Y", ["ui"], 60.0)).await;
        registry.register(Agent::new("Z", ["api"], 99.0)).await;
        registry
    }

    #[tokio::test]
    async fn test_best_match_prefers_highest_score() {
        let registry = ui_registry().await;
        let task = Task::new("t1", "Build widget", 1).with_tag("ui");
        assert_eq!(registry.best_match(&task).await.unwrap(), "X");
    }

    #[tokio::test]
    async fn test_best_match_skips_busy_agents() {
        let registry = ui_registry().await;
        registry.acquire("X").await.unwrap();
        let task = Task::new("t1", "Build widget", 1).with_tag("ui");
        assert_eq!(registry.best_match(&task).await.unwrap(), "Y");

        registry.acquire("Y").await.unwrap();
        let err = registry.best_match(&task).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_untagged_task_uses_any_agent() {
        let registry = ui_registry().await;
        let task = Task::new("t1", "Anything", 1);
        assert_eq!(registry.best_match(&task).await.unwrap(), "Z");
    }

    #[tokio::test]
    async fn test_unknown_tags_fall_back_to_all_agents() {
        let registry = ui_registry().await;
        let task = Task::new("t1", "Write poetry", 1).with_tag("poetry");
        assert_eq!(registry.best_match(&task).await.unwrap(), "Z");
    }

    #[tokio::test]
    async fn test_preferred_agent_wins_when_ready() {
        let registry = ui_registry().await;
        let task = Task::new("t1", "Build widget", 1).with_tag("ui").with_preferred_agent("Y");
        assert_eq!(registry.best_match(&task).await.unwrap(), "Y");

        registry.acquire("Y").await.unwrap();
        assert!(registry.best_match(&task).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_unregistered_preferred_agent_is_ignored() {
        let registry = ui_registry().await;
        let task = Task::new("t1", "Build widget", 1).with_tag("ui").with_preferred_agent("ghost");
        assert_eq!(registry.best_match(&task).await.unwrap(), "X");
    }

    #[tokio::test]
    async fn test_empty_registry_has_no_agent() {
        let registry = AgentRegistry::default();
        let task = Task::new("t1", "x", 1);
        assert!(matches!(
            registry.best_match(&task).await,
            Err(OrchestrationError::NoAgentAvailable(_))
        ));
    }

    #[tokio::test]
    async fn test_acquire_release() {
        let registry = ui_registry().await;
        registry.acquire("X").await.unwrap();
        assert_eq!(registry.get("X").await.unwrap().state, AgentState::Busy);
        assert!(registry.acquire("X").await.unwrap_err().is_transient());

        registry.release("X").await.unwrap();
        assert_eq!(registry.get("X").await.unwrap().state, AgentState::Ready);
        assert!(registry.acquire("X").await.is_ok());

        assert!(matches!(
            registry.acquire("missing").await,
            Err(OrchestrationError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let registry = Arc::new(ui_registry().await);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.acquire("X").await.is_ok() }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_best_hands_out_distinct_agents() {
        let registry = Arc::new(ui_registry().await);
        let task = Task::new("t1", "Build widget", 1).with_tag("ui");
        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = Arc::clone(&registry);
            let task = task.clone();
            handles.push(tokio::spawn(async move { registry.acquire_best(&task).await }));
        }
        let mut names = Vec::new();
        for handle in handles {
            if let Ok(agent) = handle.await.unwrap() {
                names.push(agent.name);
            }
        }
        names.sort();
        assert_eq!(names, vec!["X", "Y"]);
    }

    #[test]
    fn test_ema_moves_toward_observation() {
        let updated = ema(80.0, 30.0, 0.2);
        assert!((updated - 70.0).abs() < 1e-9);
        assert!(updated < 80.0 && updated > 30.0);

        let same = ema(55.0, 55.0, 0.2);
        assert!((same - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_stays_bounded() {
        let mut score = 50.0;
        for _ in 0..100 {
            score = ema(score, 150.0, 0.2);
            assert!(score <= MAX_SCORE);
        }
        for _ in 0..100 {
            score = ema(score, -40.0, 0.2);
            assert!(score >= MIN_SCORE);
        }
    }

    #[tokio::test]
    async fn test_update_score_applies_ema_and_stats() {
        let registry = ui_registry().await;
        let new = registry.update_score("X", &result("X", 30.0, Outcome::Failure)).await.unwrap();
        assert!((new - 70.0).abs() < 1e-9);

        let agent = registry.get("X").await.unwrap();
        assert_eq!(agent.stats.executions, 1);
        assert_eq!(agent.stats.failures, 1);
        assert_eq!(agent.stats.last_score, Some(30.0));

        assert!(registry.update_score("ghost", &result("ghost", 1.0, Outcome::Success)).await.is_err());
    }

    #[tokio::test]
    async fn test_from_config_uses_initial_score() {
        let configs = vec![
            AgentConfig { name: "a".to_string(), tags: vec!["ui".to_string()], score: None },
            AgentConfig { name: "b".to_string(), tags: vec![], score: Some(120.0) },
        ];
        let registry = AgentRegistry::from_config(&configs, &LearningConfig::default());
        assert!((registry.get("a").await.unwrap().performance_score - 50.0).abs() < 1e-9);
        assert!((registry.get("b").await.unwrap().performance_score - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_snapshot_restore_resets_busy() {
        let registry = ui_registry().await;
        registry.acquire("X").await.unwrap();
        let snapshot = registry.snapshot().await;

        let restored = AgentRegistry::default();
        restored.restore(snapshot).await;
        assert_eq!(restored.count().await, 3);
        assert_eq!(restored.busy_count().await, 0);
        assert!((restored.get("X").await.unwrap().performance_score - 80.0).abs() < 1e-9);
    }
}
