//! The execution loop.
//!
//! One serial activity that repeatedly dequeues the next task, runs it
//! through the learning loop and records the result. Each iteration moves
//! through idle, dequeue, resolve agent, execute and record.

use crate::learning::ExecutionResult;
use crate::orchestrator::OrchestratorContext;
use crate::task::TaskStatus;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What a single iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The queue was empty.
    Idle,
    /// No agent could take the task; it went back to the queue.
    Requeued(String),
    /// A task ran and its result was recorded.
    Executed(ExecutionResult),
}

/// Dequeues and executes tasks until cancelled.
#[derive(Debug, Clone)]
pub struct ExecutionLoop {
    ctx: OrchestratorContext,
}

impl ExecutionLoop {
    /// Creates a loop over the shared context.
    #[must_use]
    pub const fn new(ctx: OrchestratorContext) -> Self {
        Self { ctx }
    }

    /// Runs one iteration.
    ///
    /// Agent unavailability returns the task to the queue. Any other error
    /// while executing is recorded as a failed result; nothing escapes.
    pub async fn run_once(&self) -> Step {
        let Some(task) = self.ctx.queue.dequeue_next().await else {
            return Step::Idle;
        };

        let result = match self.ctx.learning.execute_with_learning(&task).await {
            Ok(result) => result,
            Err(e) if e.is_transient() => {
                warn!(task_id = %task.id, attempts = task.attempts + 1, reason = %e, "No agent available, requeueing task");
                if let Err(e) = self.ctx.queue.requeue(&task.id).await {
                    error!(task_id = %task.id, error = %e, "Failed to requeue task");
                }
                return Step::Requeued(task.id);
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Task execution failed");
                ExecutionResult::failed(&task.id, String::new(), Duration::ZERO, e.to_string())
            }
        };

        let status = if result.is_completed() { TaskStatus::Completed } else { TaskStatus::Failed };
        if let Err(e) = self.ctx.queue.mark(&task.id, status).await {
            error!(task_id = %task.id, status = %status, error = %e, "Failed to mark task");
        }

        self.ctx.status.record(result.clone()).await;
        self.ctx.export_status().await;
        Step::Executed(result)
    }

    /// Loops until `cancel` fires.
    ///
    /// Cancellation is checked before every dequeue and during every pause;
    /// a task already executing runs to completion and is recorded.
    pub async fn run(self, cancel: CancellationToken, started: oneshot::Sender<()>) {
        let idle_poll = self.ctx.config.execution.idle_poll();
        let requeue_backoff = self.ctx.config.execution.requeue_backoff();

        info!("Execution loop started");
        let _ = started.send(());

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let pause = match self.run_once().await {
                Step::Idle => idle_poll,
                Step::Requeued(_) => requeue_backoff,
                Step::Executed(_) => continue,
            };

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(pause) => {}
            }
        }

        info!("Execution loop stopped");
    }
}
