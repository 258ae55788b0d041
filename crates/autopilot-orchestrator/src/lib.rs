//! Autonomous task orchestration.
//!
//! A long-running orchestrator keeps a priority queue of tasks, skips work
//! whose outcome already exists, routes each task to the best-fit agent and
//! learns agent performance from every execution. Task execution and trigger
//! monitoring run as two concurrent activities over the shared queue and
//! registry.
//!
//! ```no_run
//! use autopilot_orchestrator::{Orchestrator, OrchestratorConfig, SimulatedRunner, Task};
//! use std::sync::Arc;
//!
//! # async fn demo() -> autopilot_orchestrator::Result<()> {
//! let mut orchestrator =
//!     Orchestrator::new(OrchestratorConfig::default(), Arc::new(SimulatedRunner::default()))?;
//! orchestrator.add_task(Task::new("header", "Extract universal Header component", 95)).await?;
//! orchestrator.start().await?;
//! // ...
//! orchestrator.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod checkpoint;
pub mod config;
pub mod dedup;
pub mod error;
pub mod execution;
pub mod learning;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod runners;
pub mod status;
pub mod task;
pub mod trigger;

pub use analyzer::TaskAnalyzer;
pub use checkpoint::OrchestratorCheckpoint;
pub use config::{ConfigError, OrchestratorConfig};
pub use dedup::{
    ArtifactSnapshot, ArtifactSource, DuplicationChecker, FsArtifactSource, NormalizedTextMatcher,
    SimilarityPredicate,
};
pub use error::{OrchestrationError, Result};
pub use execution::{ExecutionLoop, Step};
pub use learning::{ExecutionResult, LearningLoop, Outcome};
pub use orchestrator::{LifecycleState, Orchestrator, OrchestratorContext, SubmitOutcome};
pub use queue::{QueueMetrics, QueueSnapshot, TaskQueue};
pub use registry::{Agent, AgentRegistry, AgentState};
pub use runners::{AgentRunner, CommandRunner, RunReport, SimulatedRunner};
pub use status::{AgentStatus, OrchestratorStatus, StatusBoard};
pub use task::{Priority, Task, TaskStatus, TaskSubmission};
pub use trigger::{TaskTemplate, Trigger, TriggerCondition, TriggerDefinition, TriggerSystem};
