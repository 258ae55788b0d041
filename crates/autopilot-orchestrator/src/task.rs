//! Task records and their status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Priority for task execution (higher value = dequeued sooner).
pub type Priority = i64;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,
    /// Dequeued and handed to an agent.
    InProgress,
    /// Finished with a success or partial outcome.
    Completed,
    /// Finished with a failure outcome.
    Failed,
}

impl TaskStatus {
    /// Checks if a task can move to the given status.
    ///
    /// The only legal path is pending -> in_progress -> {completed, failed}.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed | Self::Failed)
        )
    }

    /// Whether the status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A unit of requested work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id across the queue's lifetime.
    pub id: String,
    /// What the task should accomplish.
    pub description: String,
    /// Higher priority runs first.
    pub priority: Priority,
    /// Agent the submitter asked for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_agent: Option<String>,
    /// Capability tags an agent needs to take this task.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Artifact identifier the task is expected to produce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Current status.
    pub status: TaskStatus,
    /// Number of times the task went back to the queue for lack of an agent.
    #[serde(default)]
    pub attempts: u32,
    /// Submission time; breaks priority ties (earlier first).
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new pending task.
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            priority,
            preferred_agent: None,
            tags: BTreeSet::new(),
            target: None,
            status: TaskStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the preferred agent.
    #[must_use]
    pub fn with_preferred_agent(mut self, agent: impl Into<String>) -> Self {
        self.preferred_agent = Some(agent.into());
        self
    }

    /// Adds a required capability tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Sets the artifact identifier the task produces.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Overrides the creation timestamp.
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }
}

/// Payload accepted by the task submission interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Unique task id.
    pub id: String,
    /// Task description.
    pub description: String,
    /// Priority (higher = sooner).
    #[serde(default)]
    pub priority: Priority,
    /// Preferred agent name.
    #[serde(default, alias = "agent")]
    pub preferred_agent: Option<String>,
    /// Explicit capability requirements.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Artifact identifier the task produces.
    #[serde(default)]
    pub target: Option<String>,
}

impl TaskSubmission {
    /// Creates a submission with no agent preference or tags.
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            priority,
            preferred_agent: None,
            tags: Vec::new(),
            target: None,
        }
    }
}

impl From<TaskSubmission> for Task {
    fn from(submission: TaskSubmission) -> Self {
        let mut task = Self::new(submission.id, submission.description, submission.priority);
        task.preferred_agent = submission.preferred_agent;
        task.tags = submission.tags.into_iter().collect();
        task.target = submission.target;
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Failed));

        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_submission_accepts_agent_alias() {
        let json = r#"{
            "id": "anima_extract_001",
            "description": "Extract universal Header/Footer",
            "priority": 95,
            "agent": "reiki-frontend-strategist"
        }"#;
        let submission: TaskSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(submission.preferred_agent.as_deref(), Some("reiki-frontend-strategist"));

        let task = Task::from(submission);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, 95);
        assert!(task.tags.is_empty());
    }

    #[test]
    fn test_builder_methods() {
        let task = Task::new("t1", "Create booking form", 10)
            .with_tag("ui")
            .with_target("BookingForm")
            .with_preferred_agent("reiki-frontend-strategist");
        assert!(task.tags.contains("ui"));
        assert_eq!(task.target.as_deref(), Some("BookingForm"));
        assert_eq!(task.attempts, 0);
    }
}
