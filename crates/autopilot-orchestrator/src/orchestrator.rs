//! Orchestrator lifecycle and shared context.
//!
//! The [`OrchestratorContext`] bundles the shared, individually locked
//! components (queue, registry, duplication checker, learning loop, status
//! board). Every activity gets a clone of it; nothing is global, so several
//! orchestrators can live in one process.
//!
//! The [`Orchestrator`] owns the lifecycle:
//!
//! ```text
//! STOPPED -> STARTING -> RUNNING -> STOPPING -> STOPPED
//!               |
//!               +-> STOPPED (startup error)
//! ```

use crate::analyzer::TaskAnalyzer;
use crate::checkpoint::OrchestratorCheckpoint;
use crate::config::OrchestratorConfig;
use crate::dedup::DuplicationChecker;
use crate::error::{OrchestrationError, Result};
use crate::execution::ExecutionLoop;
use crate::learning::LearningLoop;
use crate::queue::TaskQueue;
use crate::registry::AgentRegistry;
use crate::runners::AgentRunner;
use crate::status::{AgentStatus, OrchestratorStatus, StatusBoard};
use crate::task::{Task, TaskSubmission};
use crate::trigger::TriggerSystem;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl LifecycleState {
    /// Checks if a transition to the target state is valid.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Running | Self::Stopped)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// How a submission was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The task was enqueued.
    Accepted,
    /// The task's outcome already exists; it was not enqueued.
    SkippedExistingArtifact,
}

/// Shared state handed to every activity.
#[derive(Debug, Clone)]
pub struct OrchestratorContext {
    pub config: Arc<OrchestratorConfig>,
    pub queue: Arc<TaskQueue>,
    pub registry: Arc<AgentRegistry>,
    pub dedup: Arc<DuplicationChecker>,
    pub analyzer: Arc<TaskAnalyzer>,
    pub learning: Arc<LearningLoop>,
    pub status: Arc<StatusBoard>,
    lifecycle: Arc<RwLock<LifecycleState>>,
}

impl OrchestratorContext {
    /// Builds every component from `config`.
    ///
    /// # Errors
    /// Returns `Configuration` if the config fails validation or the routing
    /// rules are invalid.
    pub fn new(config: OrchestratorConfig, runner: Arc<dyn AgentRunner>) -> Result<Self> {
        config.validate().map_err(|e| OrchestrationError::Configuration(e.to_string()))?;
        let registry = Arc::new(AgentRegistry::from_config(&config.agents, &config.learning));
        let dedup = Arc::new(DuplicationChecker::from_config(&config.dedup));
        Self::from_parts(config, registry, dedup, runner)
    }

    /// Builds a context around an existing registry and duplication checker.
    ///
    /// The configured agent roster is ignored in favour of `registry`.
    ///
    /// # Errors
    /// Returns `Configuration` if the settings fail validation or the
    /// routing rules are invalid.
    pub fn from_parts(
        config: OrchestratorConfig,
        registry: Arc<AgentRegistry>,
        dedup: Arc<DuplicationChecker>,
        runner: Arc<dyn AgentRunner>,
    ) -> Result<Self> {
        config.validate_settings().map_err(|e| OrchestrationError::Configuration(e.to_string()))?;
        let analyzer = Arc::new(TaskAnalyzer::new(&config.routing.rules)?);
        let learning = Arc::new(
            LearningLoop::new(Arc::clone(&registry), runner, config.learning.scoring.clone())
                .with_timeout(config.execution.task_timeout()),
        );
        let status = Arc::new(
            StatusBoard::new(config.status.recent_results)
                .with_status_file(config.status.status_file.clone())
                .with_execution_log(config.status.execution_log.clone()),
        );

        Ok(Self {
            queue: Arc::new(TaskQueue::new(config.execution.history_limit)),
            registry,
            dedup,
            analyzer,
            learning,
            status,
            lifecycle: Arc::new(RwLock::new(LifecycleState::Stopped)),
            config: Arc::new(config),
        })
    }

    /// Current lifecycle state.
    pub async fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.read().await
    }

    /// Builds a status snapshot.
    pub async fn status_snapshot(&self) -> OrchestratorStatus {
        let agents = self.registry.list().await;
        OrchestratorStatus {
            state: self.lifecycle().await,
            queue: self.queue.metrics().await,
            agents: agents.iter().map(AgentStatus::from).collect(),
            recent_results: self.status.recent().await,
            total_executions: self.status.total().await,
            generated_at: Utc::now(),
        }
    }

    /// Writes a fresh snapshot to the status file, if configured.
    pub async fn export_status(&self) {
        let snapshot = self.status_snapshot().await;
        self.status.export(&snapshot).await;
    }
}

/// Runs the execution loop and the trigger system as two concurrent activities.
pub struct Orchestrator {
    ctx: OrchestratorContext,
    cancel: Option<CancellationToken>,
    activities: Vec<JoinHandle<()>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("running", &self.cancel.is_some())
            .field("activities", &self.activities.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates a stopped orchestrator.
    ///
    /// # Errors
    /// Returns `Configuration` if the configuration is inconsistent.
    pub fn new(config: OrchestratorConfig, runner: Arc<dyn AgentRunner>) -> Result<Self> {
        Ok(Self::with_context(OrchestratorContext::new(config, runner)?))
    }

    /// Creates a stopped orchestrator over an existing context.
    #[must_use]
    pub const fn with_context(ctx: OrchestratorContext) -> Self {
        Self { ctx, cancel: None, activities: Vec::new() }
    }

    /// The shared context.
    #[must_use]
    pub const fn context(&self) -> &OrchestratorContext {
        &self.ctx
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> LifecycleState {
        self.ctx.lifecycle().await
    }

    /// Submits a task. Allowed in any lifecycle state.
    ///
    /// Tags are inferred when the task has none. When existing work has been
    /// scanned and submissions are checked, a task whose outcome already
    /// exists is skipped rather than enqueued; its id stays reserved.
    ///
    /// # Errors
    /// Returns `DuplicateTask` if the id was ever accepted before.
    pub async fn add_task(&self, mut task: Task) -> Result<SubmitOutcome> {
        if self.ctx.queue.contains(&task.id).await {
            return Err(OrchestrationError::DuplicateTask(task.id));
        }

        self.ctx.analyzer.apply(&mut task);

        if self.ctx.config.dedup.check_submissions
            && self.ctx.dedup.cached().await.is_some()
            && self.ctx.dedup.is_duplicate(&task).await
        {
            self.ctx.queue.reserve(&task.id).await?;
            warn!(task_id = %task.id, "Submitted task matches existing work, skipping");
            return Ok(SubmitOutcome::SkippedExistingArtifact);
        }

        let task_id = task.id.clone();
        self.ctx.queue.enqueue(task).await?;
        info!(task_id = %task_id, "Task submitted");
        Ok(SubmitOutcome::Accepted)
    }

    /// Submits a task from its wire form.
    ///
    /// # Errors
    /// Returns `DuplicateTask` if the id was ever accepted before.
    pub async fn submit(&self, submission: TaskSubmission) -> Result<SubmitOutcome> {
        self.add_task(submission.into()).await
    }

    /// Starts both activities and returns once both are running.
    ///
    /// Existing work is scanned first and pending tasks whose outcome
    /// already exists are dropped.
    ///
    /// # Errors
    /// Returns `InvalidLifecycleTransition` unless stopped, and
    /// `Configuration` if the registry is empty. A failed start leaves the
    /// orchestrator stopped.
    pub async fn start(&mut self) -> Result<()> {
        self.transition(LifecycleState::Starting).await?;
        info!("Starting orchestrator");

        match self.launch().await {
            Ok(()) => {
                self.transition(LifecycleState::Running).await?;
                info!(agents = self.ctx.registry.count().await, "Orchestrator running");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Orchestrator failed to start");
                self.transition(LifecycleState::Stopped).await?;
                Err(e)
            }
        }
    }

    async fn launch(&mut self) -> Result<()> {
        if self.ctx.registry.count().await == 0 {
            return Err(OrchestrationError::Configuration("agent registry is empty".to_string()));
        }

        if self.ctx.dedup.is_enabled() {
            self.ctx.dedup.scan_existing_work().await;
            for task in self.ctx.queue.pending_tasks().await {
                if self.ctx.dedup.is_duplicate(&task).await {
                    warn!(task_id = %task.id, "Pending task matches existing work, discarding");
                    self.ctx.queue.discard(&task.id).await;
                }
            }
        }

        let cancel = CancellationToken::new();
        let (execution_tx, execution_rx) = oneshot::channel();
        let (triggers_tx, triggers_rx) = oneshot::channel();

        let execution = ExecutionLoop::new(self.ctx.clone());
        let triggers = TriggerSystem::from_definitions(
            &self.ctx.config.triggers.definitions,
            self.ctx.config.triggers.poll_interval(),
        );

        self.activities.push(tokio::spawn(execution.run(cancel.clone(), execution_tx)));
        self.activities.push(tokio::spawn(triggers.run(self.ctx.clone(), cancel.clone(), triggers_tx)));

        if execution_rx.await.is_err() || triggers_rx.await.is_err() {
            cancel.cancel();
            self.join_activities().await;
            return Err(OrchestrationError::Execution("activity exited before starting".to_string()));
        }

        self.cancel = Some(cancel);
        Ok(())
    }

    /// Cancels both activities and waits for them to finish.
    ///
    /// A task already executing completes and its result is recorded
    /// before this returns; no new task starts.
    ///
    /// # Errors
    /// Returns `InvalidLifecycleTransition` unless running.
    pub async fn stop(&mut self) -> Result<()> {
        self.transition(LifecycleState::Stopping).await?;
        info!("Stopping orchestrator");

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.join_activities().await;

        self.transition(LifecycleState::Stopped).await?;
        self.ctx.export_status().await;
        info!("Orchestrator stopped");
        Ok(())
    }

    async fn join_activities(&mut self) {
        for handle in self.activities.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Activity terminated abnormally");
            }
        }
    }

    /// Status snapshot.
    pub async fn status(&self) -> OrchestratorStatus {
        self.ctx.status_snapshot().await
    }

    /// Captures the queue and agent state.
    pub async fn checkpoint(&self) -> OrchestratorCheckpoint {
        OrchestratorCheckpoint::new(self.ctx.queue.snapshot().await, self.ctx.registry.snapshot().await)
    }

    /// Reloads queue and agent state from a checkpoint.
    ///
    /// Tasks that were in progress go back to pending; agents come back ready.
    /// An empty agent list in the checkpoint keeps the configured roster.
    ///
    /// # Errors
    /// Returns `InvalidLifecycleTransition` unless stopped.
    pub async fn restore(&self, checkpoint: OrchestratorCheckpoint) -> Result<()> {
        let state = self.state().await;
        if state != LifecycleState::Stopped {
            return Err(OrchestrationError::InvalidLifecycleTransition {
                from: state.to_string(),
                to: "restore".to_string(),
            });
        }

        self.ctx.queue.restore(checkpoint.queue).await;
        if !checkpoint.agents.is_empty() {
            self.ctx.registry.restore(checkpoint.agents).await;
        }
        info!(pending = self.ctx.queue.pending_count().await, "Orchestrator restored from checkpoint");
        Ok(())
    }

    async fn transition(&self, target: LifecycleState) -> Result<()> {
        let mut state = self.ctx.lifecycle.write().await;
        if !state.can_transition_to(target) {
            return Err(OrchestrationError::InvalidLifecycleTransition {
                from: state.to_string(),
                to: target.to_string(),
            });
        }
        let from = *state;
        debug!(from = %from, to = %target, "Lifecycle transition");
        *state = target;
        Ok(())
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}
