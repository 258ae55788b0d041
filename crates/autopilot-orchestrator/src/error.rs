// Error types for orchestration

use crate::task::TaskStatus;
use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// A task with the same id is already pending, running, or in history
    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    /// Task status change outside pending -> in_progress -> {completed, failed}
    #[error("Invalid transition for task '{task_id}' from {from} to {to}")]
    InvalidTransition {
        /// Task id
        task_id: String,
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },

    /// No ready agent can take the task right now
    #[error("No agent available: {0}")]
    NoAgentAvailable(String),

    /// Delegated execution failed
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Task id is not tracked by the queue
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Agent name is not registered
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Orchestrator lifecycle change that is not allowed from the current state
    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidLifecycleTransition {
        /// Current lifecycle state
        from: String,
        /// Requested lifecycle state
        to: String,
    },

    /// Structural misconfiguration (empty registry, bad config values)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl OrchestrationError {
    /// Whether the error is transient and the operation should be retried later.
    ///
    /// Only agent unavailability qualifies: the task goes back to the queue
    /// instead of being marked failed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NoAgentAvailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            OrchestrationError::DuplicateTask("task-1".to_string()).to_string(),
            "Duplicate task id: task-1"
        );
        let err = OrchestrationError::InvalidTransition {
            task_id: "task-1".to_string(),
            from: TaskStatus::Completed,
            to: TaskStatus::Pending,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for task 'task-1' from completed to pending"
        );
    }

    #[test]
    fn test_only_agent_unavailability_is_transient() {
        assert!(OrchestrationError::NoAgentAvailable("ui".to_string()).is_transient());
        assert!(!OrchestrationError::Execution("boom".to_string()).is_transient());
        assert!(!OrchestrationError::DuplicateTask("a".to_string()).is_transient());
        assert!(!OrchestrationError::AgentNotFound("x".to_string()).is_transient());
    }
}
