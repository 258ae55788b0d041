//! Submit command implementation.

use super::offline_orchestrator;
use anyhow::Context;
use autopilot_orchestrator::{OrchestratorConfig, SubmitOutcome, TaskSubmission};
use colored::Colorize;
use std::path::Path;

/// Execute the submit command.
///
/// The task is added to the checkpoint at `state` and picked up by the next
/// `autopilot run`. Submitting an id that was ever accepted fails.
pub async fn execute(
    config: OrchestratorConfig,
    submission: TaskSubmission,
    state: &Path,
) -> anyhow::Result<()> {
    let orchestrator = offline_orchestrator(config, state).await?;

    let id = submission.id.clone();
    match orchestrator.submit(submission).await? {
        SubmitOutcome::Accepted => {
            println!("{} Task {} accepted", "✓".green(), id.cyan());
        }
        SubmitOutcome::SkippedExistingArtifact => {
            println!("{} Task {} skipped: its artifact already exists", "!".yellow(), id.cyan());
        }
    }

    orchestrator
        .checkpoint()
        .await
        .save_to_file(state)
        .with_context(|| format!("failed to save checkpoint {}", state.display()))?;

    let pending = orchestrator.context().queue.pending_count().await;
    println!("  {} task(s) pending", pending);
    Ok(())
}
