//! Run command implementation.

use super::{DEFAULT_EXECUTION_LOG_PATH, restore_if_present, status_path};
use anyhow::Context;
use autopilot_orchestrator::{
    AgentRunner, CommandRunner, Orchestrator, OrchestratorConfig, OrchestrationError,
    SimulatedRunner, SubmitOutcome, TaskSubmission,
};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Options for `autopilot run`.
#[derive(Debug)]
pub struct RunOptions {
    pub state: PathBuf,
    pub tasks: Option<PathBuf>,
    pub duration: Option<u64>,
    pub until_idle: bool,
    pub command: Option<String>,
    pub simulate_ms: u64,
}

/// Execute the run command.
pub async fn execute(mut config: OrchestratorConfig, options: RunOptions) -> anyhow::Result<()> {
    if config.status.status_file.is_none() {
        config.status.status_file = Some(status_path(&config));
    }
    if config.status.execution_log.is_none() {
        config.status.execution_log = Some(PathBuf::from(DEFAULT_EXECUTION_LOG_PATH));
    }

    let runner: Arc<dyn AgentRunner> = match &options.command {
        Some(command) => Arc::new(CommandRunner::new(command.clone())),
        None => Arc::new(SimulatedRunner::new(Duration::from_millis(options.simulate_ms))),
    };

    let mut orchestrator = Orchestrator::new(config, runner)?;
    if restore_if_present(&orchestrator, &options.state).await? {
        println!("{} Restored checkpoint {}", "✓".green(), options.state.display());
    }

    if let Some(path) = &options.tasks {
        let submitted = preload_tasks(&orchestrator, path).await?;
        println!("{} Pre-loaded {} task(s) from {}", "✓".green(), submitted, path.display());
    }

    orchestrator.start().await?;
    println!("{} Orchestrator running (Ctrl-C to stop)", "▶".cyan());

    wait_for_shutdown(&orchestrator, &options).await;

    orchestrator.stop().await?;
    save_checkpoint(&orchestrator, &options.state).await?;

    let status = orchestrator.status().await;
    println!();
    println!("{}", "Run summary".bold().cyan());
    println!("  Executed:  {}", status.total_executions.to_string().green());
    println!("  Completed: {}", status.queue.completed);
    println!("  Failed:    {}", status.queue.failed);
    println!("  Pending:   {}", status.queue.pending);
    if let Some(average) = status.average_score() {
        println!("  Avg score: {:.1}", average);
    }
    println!("  Checkpoint saved to {}", options.state.display().to_string().dimmed());

    Ok(())
}

async fn preload_tasks(orchestrator: &Orchestrator, path: &Path) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read task file {}", path.display()))?;
    let submissions: Vec<TaskSubmission> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse task file {}", path.display()))?;

    let mut accepted = 0;
    for submission in submissions {
        let id = submission.id.clone();
        match orchestrator.submit(submission).await {
            Ok(SubmitOutcome::Accepted) => accepted += 1,
            Ok(SubmitOutcome::SkippedExistingArtifact) => {
                warn!(task_id = %id, "Task already has an artifact, skipped");
            }
            Err(OrchestrationError::DuplicateTask(id)) => {
                warn!(task_id = %id, "Task already known, skipped");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(accepted)
}

async fn wait_for_shutdown(orchestrator: &Orchestrator, options: &RunOptions) {
    let deadline = async {
        match options.duration {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending().await,
        }
    };

    let idle = async {
        if !options.until_idle {
            return std::future::pending().await;
        }
        loop {
            tokio::time::sleep(IDLE_CHECK_INTERVAL).await;
            if orchestrator.context().queue.metrics().await.depth() == 0 {
                break;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
        () = deadline => info!("Run duration elapsed"),
        () = idle => info!("Queue drained"),
    }
}

async fn save_checkpoint(orchestrator: &Orchestrator, state: &Path) -> anyhow::Result<()> {
    orchestrator
        .checkpoint()
        .await
        .save_to_file(state)
        .with_context(|| format!("failed to save checkpoint {}", state.display()))
}
