//! Durable orchestrator state.

use crate::error::Result;
use crate::queue::QueueSnapshot;
use crate::registry::Agent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Queue contents and learned agent state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorCheckpoint {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub queue: QueueSnapshot,
    pub agents: Vec<Agent>,
}

impl OrchestratorCheckpoint {
    /// Creates a checkpoint stamped now.
    #[must_use]
    pub fn new(queue: QueueSnapshot, agents: Vec<Agent>) -> Self {
        Self { version: CHECKPOINT_VERSION, saved_at: Utc::now(), queue, agents }
    }

    /// Writes the checkpoint as JSON.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        debug!(path = %path.display(), pending = self.queue.pending.len(), "Checkpoint saved");
        Ok(())
    }

    /// Reads a checkpoint.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let checkpoint: Self = serde_json::from_str(&content)?;
        debug!(path = %path.display(), version = checkpoint.version, "Checkpoint loaded");
        Ok(checkpoint)
    }

    /// Reads a checkpoint if the file exists.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>> {
        if path.exists() { Self::load_from_file(path).map(Some) } else { Ok(None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("checkpoint.json");

        let queue = QueueSnapshot {
            pending: vec![Task::new("t1", "Build form", 5)],
            known_ids: ["t1".to_string()].into_iter().collect(),
            ..QueueSnapshot::default()
        };
        let checkpoint = OrchestratorCheckpoint::new(queue, vec![Agent::new("X", ["ui"], 80.0)]);
        checkpoint.save_to_file(&path).unwrap();

        let loaded = OrchestratorCheckpoint::load_if_exists(&path).unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_missing_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        assert!(OrchestratorCheckpoint::load_if_exists(&temp_dir.path().join("none.json")).unwrap().is_none());
    }
}
