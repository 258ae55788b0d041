//! Validate command implementation.

use autopilot_orchestrator::{
    ExecutionLoop, OrchestratorConfig, OrchestratorContext, Outcome, SimulatedRunner, Step, Task,
};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;

/// Execute the validate command.
///
/// Checks the configuration, then routes and executes one simulated task
/// through a throwaway context. Nothing is written to disk.
pub async fn execute(mut config: OrchestratorConfig) -> anyhow::Result<()> {
    println!("{}", "Validating autopilot".bold().cyan());
    println!();

    config.validate()?;
    println!("  {} Configuration valid", "✓".green());
    println!(
        "  {} {} agent(s), {} routing rule(s), {} trigger(s)",
        "✓".green(),
        config.agents.len(),
        config.routing.rules.len(),
        config.triggers.definitions.len()
    );

    config.status.status_file = None;
    config.status.execution_log = None;
    config.dedup.artifact_root = None;

    let ctx = OrchestratorContext::new(config, Arc::new(SimulatedRunner::new(Duration::ZERO)))?;
    if ctx.registry.count().await == 0 {
        anyhow::bail!("no agents configured");
    }

    let mut task = Task::new("autopilot-validate", "Validate orchestration pipeline", 0);
    ctx.analyzer.apply(&mut task);
    ctx.queue.enqueue(task).await?;

    match ExecutionLoop::new(ctx).run_once().await {
        Step::Executed(result) if result.outcome != Outcome::Failure => {
            println!(
                "  {} Simulated task routed to {} (score {:.1})",
                "✓".green(),
                result.agent.cyan(),
                result.score
            );
        }
        Step::Executed(result) => {
            anyhow::bail!(
                "simulated task failed: {}",
                result.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        step => anyhow::bail!("simulated task did not execute: {:?}", step),
    }

    println!();
    println!("{}", "All checks passed".green().bold());
    Ok(())
}
