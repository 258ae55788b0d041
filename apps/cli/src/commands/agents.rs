//! Agents command implementation.

use super::offline_orchestrator;
use autopilot_orchestrator::{AgentState, AgentStatus, OrchestratorConfig};
use colored::Colorize;
use std::path::Path;
use tabled::{Table, Tabled, settings::Style};

/// Execute the agents command.
///
/// Lists the roster with learned scores from the checkpoint at `state`, or
/// the configured roster when no checkpoint exists.
pub async fn execute(config: OrchestratorConfig, state: &Path, json_output: bool) -> anyhow::Result<()> {
    let orchestrator = offline_orchestrator(config, state).await?;
    let agents: Vec<AgentStatus> =
        orchestrator.context().registry.list().await.iter().map(AgentStatus::from).collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }

    if agents.is_empty() {
        println!("{}", "No agents configured".yellow());
        return Ok(());
    }

    display_agents_table(&agents);
    Ok(())
}

fn display_agents_table(agents: &[AgentStatus]) {
    #[derive(Tabled)]
    struct AgentRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Tags")]
        tags: String,
        #[tabled(rename = "Score")]
        score: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "Runs")]
        runs: u64,
        #[tabled(rename = "OK/Partial/Fail")]
        breakdown: String,
    }

    let rows: Vec<AgentRow> = agents
        .iter()
        .map(|agent| AgentRow {
            name: agent.name.clone(),
            tags: if agent.tags.is_empty() { "-".to_string() } else { agent.tags.join(", ") },
            score: format!("{:.1}", agent.performance_score),
            state: match agent.state {
                AgentState::Ready => agent.state.to_string().green().to_string(),
                AgentState::Busy => agent.state.to_string().yellow().to_string(),
            },
            runs: agent.executions,
            breakdown: format!("{}/{}/{}", agent.successes, agent.partials, agent.failures),
        })
        .collect();

    println!("{}", "Agents".bold().cyan());
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!();
}
