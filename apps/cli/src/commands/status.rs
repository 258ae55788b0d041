//! Status command implementation.

use super::status_path;
use autopilot_orchestrator::{OrchestratorConfig, OrchestratorStatus, Outcome};
use colored::Colorize;
use std::path::PathBuf;
use tabled::{Table, Tabled, settings::Style};

/// Execute the status command.
///
/// Renders the status file last exported by `autopilot run`.
pub fn execute(
    config: &OrchestratorConfig,
    status_file: Option<PathBuf>,
    json_output: bool,
) -> anyhow::Result<()> {
    let path = status_file.unwrap_or_else(|| status_path(config));

    if !path.exists() {
        if json_output {
            println!("null");
        } else {
            println!("{}", "No status recorded yet".yellow());
            println!("  Start the orchestrator with {}", "autopilot run".cyan());
        }
        return Ok(());
    }

    let status = OrchestratorStatus::load_from_file(&path)?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        display_status(&status);
    }
    Ok(())
}

fn display_status(status: &OrchestratorStatus) {
    println!("{}", "Autopilot Status".bold().cyan());
    println!();
    println!("  State:      {}", status.state.to_string().green());
    println!("  Updated:    {}", status.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();

    println!("{}", "Queue:".bold());
    println!("  Pending:     {}", status.queue.pending);
    println!("  In progress: {}", status.queue.in_progress);
    println!("  Completed:   {}", status.queue.completed.to_string().green());
    println!("  Failed:      {}", status.queue.failed.to_string().red());
    println!();

    println!("{}", "Executions:".bold());
    println!("  Total: {}", status.total_executions);
    if let Some(average) = status.average_score() {
        println!("  Average score (recent): {:.1}", average);
    }
    println!();

    if status.recent_results.is_empty() {
        return;
    }

    #[derive(Tabled)]
    struct ResultRow {
        #[tabled(rename = "Task")]
        task: String,
        #[tabled(rename = "Agent")]
        agent: String,
        #[tabled(rename = "Outcome")]
        outcome: String,
        #[tabled(rename = "Score")]
        score: String,
        #[tabled(rename = "Duration")]
        duration: String,
    }

    let rows: Vec<ResultRow> = status
        .recent_results
        .iter()
        .rev()
        .map(|r| ResultRow {
            task: r.task_id.clone(),
            agent: if r.agent.is_empty() { "-".to_string() } else { r.agent.clone() },
            outcome: match r.outcome {
                Outcome::Success => r.outcome.to_string().green().to_string(),
                Outcome::Partial => r.outcome.to_string().yellow().to_string(),
                Outcome::Failure => r.outcome.to_string().red().to_string(),
            },
            score: format!("{:.1}", r.score),
            duration: format!("{}ms", r.duration_ms),
        })
        .collect();

    println!("{}", "Recent results:".bold());
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!();
}
