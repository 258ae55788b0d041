//! Condition-based task generation.
//!
//! Each trigger pairs a predicate over process-wide state with a task
//! template. Triggers are edge-triggered: a predicate that stays true fires
//! once, and fires again only after it has been observed false.

use crate::orchestrator::OrchestratorContext;
use crate::queue::QueueMetrics;
use crate::task::{Priority, Task};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configurable trigger condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Pending plus in-progress tasks drop below `threshold`.
    QueueDepthBelow {
        /// Exclusive upper bound.
        threshold: usize,
    },
    /// Pending plus in-progress tasks exceed `threshold`.
    QueueDepthAbove {
        /// Exclusive lower bound.
        threshold: usize,
    },
    /// `seconds` have elapsed since start or since the last firing.
    Interval {
        /// Period in seconds.
        seconds: u64,
    },
    /// The modification time of `path` differs from the last observed one.
    PathChanged {
        /// Watched file or directory.
        path: PathBuf,
    },
}

impl TriggerCondition {
    /// Builds the stateful predicate for this condition.
    #[must_use]
    pub fn into_predicate(self) -> Box<dyn TriggerPredicate> {
        match self {
            Self::QueueDepthBelow { threshold } => Box::new(QueueDepthBelow { threshold }),
            Self::QueueDepthAbove { threshold } => Box::new(QueueDepthAbove { threshold }),
            Self::Interval { seconds } => Box::new(IntervalElapsed::new(Duration::from_secs(seconds))),
            Self::PathChanged { path } => Box::new(PathChanged::new(path)),
        }
    }
}

/// Template for tasks a trigger generates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Generated ids are `{id_prefix}-{uuid}`.
    pub id_prefix: String,
    /// Description of generated tasks.
    pub description: String,
    /// Priority of generated tasks.
    #[serde(default)]
    pub priority: Priority,
    /// Capability tags; empty lets the analyzer infer them.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Preferred agent.
    #[serde(default)]
    pub preferred_agent: Option<String>,
    /// Artifact identifier generated tasks produce.
    #[serde(default)]
    pub target: Option<String>,
}

impl TaskTemplate {
    /// Creates a template with no tags or agent preference.
    #[must_use]
    pub fn new(id_prefix: impl Into<String>, description: impl Into<String>, priority: Priority) -> Self {
        Self {
            id_prefix: id_prefix.into(),
            description: description.into(),
            priority,
            tags: Vec::new(),
            preferred_agent: None,
            target: None,
        }
    }

    /// Instantiates a pending task with a fresh id.
    #[must_use]
    pub fn instantiate(&self) -> Task {
        let id = format!("{}-{}", self.id_prefix, uuid::Uuid::new_v4());
        let mut task = Task::new(id, self.description.clone(), self.priority);
        task.tags = self.tags.iter().cloned().collect();
        task.preferred_agent = self.preferred_agent.clone();
        task.target = self.target.clone();
        task
    }
}

/// A named trigger as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Unique name.
    pub name: String,
    /// When to fire.
    pub condition: TriggerCondition,
    /// What to enqueue.
    pub template: TaskTemplate,
}

/// State a predicate is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext {
    /// Queue counters at evaluation time.
    pub metrics: QueueMetrics,
    /// Evaluation time.
    pub now: Instant,
}

/// A condition over process-wide state.
pub trait TriggerPredicate: Send + Sync + fmt::Debug {
    /// Whether the condition currently holds.
    fn is_met(&mut self, ctx: &TriggerContext) -> bool;

    /// Called after the owning trigger fired; resets the condition epoch.
    fn on_fired(&mut self, _ctx: &TriggerContext) {}
}

#[derive(Debug)]
struct QueueDepthBelow {
    threshold: usize,
}

impl TriggerPredicate for QueueDepthBelow {
    fn is_met(&mut self, ctx: &TriggerContext) -> bool {
        ctx.metrics.depth() < self.threshold
    }
}

#[derive(Debug)]
struct QueueDepthAbove {
    threshold: usize,
}

impl TriggerPredicate for QueueDepthAbove {
    fn is_met(&mut self, ctx: &TriggerContext) -> bool {
        ctx.metrics.depth() > self.threshold
    }
}

#[derive(Debug)]
struct IntervalElapsed {
    period: Duration,
    epoch: Instant,
}

impl IntervalElapsed {
    fn new(period: Duration) -> Self {
        Self { period, epoch: Instant::now() }
    }
}

impl TriggerPredicate for IntervalElapsed {
    fn is_met(&mut self, ctx: &TriggerContext) -> bool {
        ctx.now.saturating_duration_since(self.epoch) >= self.period
    }

    fn on_fired(&mut self, ctx: &TriggerContext) {
        self.epoch = ctx.now;
    }
}

#[derive(Debug)]
struct PathChanged {
    path: PathBuf,
    baseline: Option<SystemTime>,
    observed: Option<SystemTime>,
}

impl PathChanged {
    fn new(path: PathBuf) -> Self {
        let baseline = modified(&path);
        Self { path, baseline, observed: baseline }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl TriggerPredicate for PathChanged {
    fn is_met(&mut self, _ctx: &TriggerContext) -> bool {
        self.observed = modified(&self.path);
        self.observed != self.baseline
    }

    fn on_fired(&mut self, _ctx: &TriggerContext) {
        self.baseline = self.observed;
    }
}

/// A predicate plus its template and edge state.
#[derive(Debug)]
pub struct Trigger {
    name: String,
    predicate: Box<dyn TriggerPredicate>,
    template: TaskTemplate,
    previously_met: bool,
    fire_count: u64,
}

impl Trigger {
    /// Creates a trigger from a custom predicate.
    #[must_use]
    pub fn new(name: impl Into<String>, predicate: Box<dyn TriggerPredicate>, template: TaskTemplate) -> Self {
        Self { name: name.into(), predicate, template, previously_met: false, fire_count: 0 }
    }

    /// Creates a trigger from its configured definition.
    #[must_use]
    pub fn from_definition(definition: &TriggerDefinition) -> Self {
        Self::new(
            definition.name.clone(),
            definition.condition.clone().into_predicate(),
            definition.template.clone(),
        )
    }

    /// Trigger name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of times the trigger fired.
    #[must_use]
    pub const fn fire_count(&self) -> u64 {
        self.fire_count
    }

    /// Evaluates the predicate; returns a new task on a false -> true edge.
    pub fn evaluate(&mut self, ctx: &TriggerContext) -> Option<Task> {
        let met = self.predicate.is_met(ctx);
        let rising = met && !self.previously_met;
        self.previously_met = met;
        if !rising {
            return None;
        }

        self.predicate.on_fired(ctx);
        self.fire_count += 1;
        let task = self.template.instantiate();
        debug!(trigger = %self.name, task_id = %task.id, "Trigger fired");
        Some(task)
    }
}

/// Polls every trigger on a fixed interval.
#[derive(Debug)]
pub struct TriggerSystem {
    triggers: Vec<Trigger>,
    poll_interval: Duration,
}

impl TriggerSystem {
    /// Creates an empty trigger system.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self { triggers: Vec::new(), poll_interval }
    }

    /// Creates a trigger system from configured definitions.
    #[must_use]
    pub fn from_definitions(definitions: &[TriggerDefinition], poll_interval: Duration) -> Self {
        Self { triggers: definitions.iter().map(Trigger::from_definition).collect(), poll_interval }
    }

    /// Adds a trigger.
    pub fn add(&mut self, trigger: Trigger) {
        self.triggers.push(trigger);
    }

    /// Registered triggers.
    #[must_use]
    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Runs one evaluation cycle and enqueues the generated tasks.
    ///
    /// Generated tasks go through the analyzer and the duplication checker;
    /// tasks matching existing work are dropped. Returns the ids enqueued.
    pub async fn poll_once(&mut self, ctx: &OrchestratorContext) -> Vec<String> {
        let trigger_ctx = TriggerContext { metrics: ctx.queue.metrics().await, now: Instant::now() };

        let fired: Vec<(String, Task)> = self
            .triggers
            .iter_mut()
            .filter_map(|t| t.evaluate(&trigger_ctx).map(|task| (t.name.clone(), task)))
            .collect();

        let mut enqueued = Vec::with_capacity(fired.len());
        for (trigger, mut task) in fired {
            ctx.analyzer.apply(&mut task);
            if ctx.dedup.is_duplicate(&task).await {
                warn!(trigger = %trigger, task_id = %task.id, "Generated task matches existing work, skipping");
                continue;
            }
            let task_id = task.id.clone();
            match ctx.queue.enqueue(task).await {
                Ok(()) => {
                    info!(trigger = %trigger, task_id = %task_id, "Trigger enqueued task");
                    enqueued.push(task_id);
                }
                Err(e) => warn!(trigger = %trigger, task_id = %task_id, error = %e, "Trigger enqueue rejected"),
            }
        }
        enqueued
    }

    /// Polls until `cancel` fires. The sleep between cycles is cancellable.
    pub async fn run(
        mut self,
        ctx: OrchestratorContext,
        cancel: CancellationToken,
        started: oneshot::Sender<()>,
    ) {
        info!(trigger_count = self.triggers.len(), interval_ms = self.poll_interval.as_millis(), "Trigger system started");
        let _ = started.send(());

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.poll_once(&ctx).await;

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Trigger system stopped");
    }
}
