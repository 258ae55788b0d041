//! Command implementations for the autopilot CLI.

pub mod agents;
pub mod run;
pub mod status;
pub mod submit;
pub mod validate;

use anyhow::Context;
use autopilot_orchestrator::{Orchestrator, OrchestratorCheckpoint, OrchestratorConfig, SimulatedRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default checkpoint location.
pub const DEFAULT_STATE_PATH: &str = ".autopilot/state.json";

/// Default status export location.
pub const DEFAULT_STATUS_PATH: &str = ".autopilot/status.json";

/// Default execution log location.
pub const DEFAULT_EXECUTION_LOG_PATH: &str = ".autopilot/executions.log";

/// Loads the configuration from `path`, or discovers it.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<OrchestratorConfig> {
    let config = match path {
        Some(path) => OrchestratorConfig::load_from_file(path)?,
        None => OrchestratorConfig::discover_and_load()?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Status file the CLI reads and writes.
pub fn status_path(config: &OrchestratorConfig) -> PathBuf {
    config.status.status_file.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_STATUS_PATH))
}

/// Builds a never-started orchestrator holding the checkpoint at `state`.
pub async fn offline_orchestrator(
    config: OrchestratorConfig,
    state: &Path,
) -> anyhow::Result<Orchestrator> {
    let orchestrator = Orchestrator::new(config, Arc::new(SimulatedRunner::new(Duration::ZERO)))?;
    restore_if_present(&orchestrator, state).await?;
    Ok(orchestrator)
}

/// Restores the checkpoint at `state` if it exists.
pub async fn restore_if_present(orchestrator: &Orchestrator, state: &Path) -> anyhow::Result<bool> {
    match OrchestratorCheckpoint::load_if_exists(state)
        .with_context(|| format!("failed to read checkpoint {}", state.display()))?
    {
        Some(checkpoint) => {
            orchestrator.restore(checkpoint).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}
