//! Priority-ordered task queue.
//!
//! Pending tasks are served highest priority first; equal priorities are served
//! in creation order, and equal creation times in submission order, so the
//! dequeue order is fully deterministic. Every task id ever accepted stays
//! reserved for the queue's lifetime: resubmitting a pending, running, or
//! finished id is rejected.

use crate::error::{OrchestrationError, Result};
use crate::task::{Task, TaskStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Default number of finished tasks retained for reporting.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Wrapper for priority queue ordering.
#[derive(Debug, Clone)]
struct QueuedTask {
    /// Submission sequence number, the last tie breaker.
    seq: u64,
    task: Task,
}

impl QueuedTask {
    fn key(&self) -> (i64, Reverse<chrono::DateTime<Utc>>, Reverse<u64>) {
        (self.task.priority, Reverse(self.task.created_at), Reverse(self.seq))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority, then earlier creation,
        // then earlier submission compare as "greater".
        self.key().cmp(&other.key())
    }
}

#[derive(Debug)]
struct QueueState {
    pending: BinaryHeap<QueuedTask>,
    in_progress: HashMap<String, (u64, Task)>,
    history: VecDeque<Task>,
    known_ids: HashSet<String>,
    completed: usize,
    failed: usize,
    next_seq: u64,
    history_limit: usize,
}

impl QueueState {
    fn new(history_limit: usize) -> Self {
        Self {
            pending: BinaryHeap::new(),
            in_progress: HashMap::new(),
            history: VecDeque::new(),
            known_ids: HashSet::new(),
            completed: 0,
            failed: 0,
            next_seq: 0,
            history_limit,
        }
    }

    fn current_status(&self, task_id: &str) -> Option<TaskStatus> {
        if self.in_progress.contains_key(task_id) {
            return Some(TaskStatus::InProgress);
        }
        if self.pending.iter().any(|q| q.task.id == task_id) {
            return Some(TaskStatus::Pending);
        }
        self.history.iter().rev().find(|t| t.id == task_id).map(|t| t.status)
    }

    fn push_history(&mut self, task: Task) {
        match task.status {
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            _ => {}
        }
        self.history.push_back(task);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }
}

/// Task queue shared by the execution loop, the trigger system, and submitters.
///
/// All operations take a single lock, so each one is atomic with respect to
/// concurrent callers.
pub struct TaskQueue {
    state: Mutex<QueueState>,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending_count", &self.state.try_lock().map(|s| s.pending.len()).unwrap_or(0))
            .field(
                "in_progress_count",
                &self.state.try_lock().map(|s| s.in_progress.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

impl TaskQueue {
    /// Creates an empty queue retaining up to `history_limit` finished tasks.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self { state: Mutex::new(QueueState::new(history_limit.max(1))) }
    }

    /// Enqueues a task.
    ///
    /// # Errors
    /// Returns `DuplicateTask` if the id was already accepted by this queue.
    pub async fn enqueue(&self, mut task: Task) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.known_ids.contains(&task.id) {
            debug!(task_id = %task.id, "Rejecting duplicate task id");
            return Err(OrchestrationError::DuplicateTask(task.id));
        }

        task.status = TaskStatus::Pending;
        let seq = state.next_seq;
        state.next_seq += 1;
        debug!(task_id = %task.id, priority = task.priority, "Enqueueing task");
        state.known_ids.insert(task.id.clone());
        state.pending.push(QueuedTask { seq, task });
        Ok(())
    }

    /// Dequeues the highest-priority pending task and marks it in progress.
    ///
    /// Returns `None` when nothing is pending.
    pub async fn dequeue_next(&self) -> Option<Task> {
        let mut state = self.state.lock().await;
        let QueuedTask { seq, mut task } = state.pending.pop()?;
        task.status = TaskStatus::InProgress;
        task.updated_at = Utc::now();
        debug!(task_id = %task.id, priority = task.priority, "Dequeued task");
        state.in_progress.insert(task.id.clone(), (seq, task.clone()));
        Some(task)
    }

    /// Moves a task to `status` along pending -> in_progress -> {completed, failed}.
    ///
    /// # Errors
    /// Returns `TaskNotFound` for unknown ids and `InvalidTransition` for any
    /// move off the linear path.
    pub async fn mark(&self, task_id: &str, status: TaskStatus) -> Result<Task> {
        let mut state = self.state.lock().await;
        let current = state
            .current_status(task_id)
            .ok_or_else(|| OrchestrationError::TaskNotFound(task_id.to_string()))?;

        if !current.can_transition_to(status) {
            error!(task_id = %task_id, from = %current, to = %status, "Invalid task transition");
            return Err(OrchestrationError::InvalidTransition {
                task_id: task_id.to_string(),
                from: current,
                to: status,
            });
        }

        let now = Utc::now();
        if current == TaskStatus::Pending {
            let mut taken = None;
            let remaining: Vec<QueuedTask> = std::mem::take(&mut state.pending)
                .into_vec()
                .into_iter()
                .filter_map(|q| {
                    if q.task.id == task_id && taken.is_none() {
                        taken = Some(q);
                        None
                    } else {
                        Some(q)
                    }
                })
                .collect();
            state.pending = remaining.into();
            let QueuedTask { seq, mut task } =
                taken.ok_or_else(|| OrchestrationError::TaskNotFound(task_id.to_string()))?;
            task.status = status;
            task.updated_at = now;
            state.in_progress.insert(task.id.clone(), (seq, task.clone()));
            debug!(task_id = %task_id, "Task marked in progress");
            return Ok(task);
        }

        let (_, mut task) = state
            .in_progress
            .remove(task_id)
            .ok_or_else(|| OrchestrationError::TaskNotFound(task_id.to_string()))?;
        task.status = status;
        task.updated_at = now;
        debug!(task_id = %task_id, status = %status, "Task finished");
        state.push_history(task.clone());
        Ok(task)
    }

    /// Returns an in-progress task to the pending set without failing it.
    ///
    /// The task keeps its original creation time and submission order.
    ///
    /// # Errors
    /// Returns `TaskNotFound` if the task is not in progress.
    pub async fn requeue(&self, task_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let (seq, mut task) = state
            .in_progress
            .remove(task_id)
            .ok_or_else(|| OrchestrationError::TaskNotFound(task_id.to_string()))?;
        task.status = TaskStatus::Pending;
        task.attempts += 1;
        task.updated_at = Utc::now();
        debug!(task_id = %task_id, attempts = task.attempts, "Task returned to queue");
        state.pending.push(QueuedTask { seq, task });
        Ok(())
    }

    /// Reserves an id without enqueueing anything.
    ///
    /// Used for submissions skipped because their outcome already exists.
    ///
    /// # Errors
    /// Returns `DuplicateTask` if the id was already accepted by this queue.
    pub async fn reserve(&self, task_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.known_ids.insert(task_id.to_string()) {
            return Err(OrchestrationError::DuplicateTask(task_id.to_string()));
        }
        debug!(task_id = %task_id, "Reserved task id");
        Ok(())
    }

    /// Drops a pending task while keeping its id reserved.
    ///
    /// Used when the duplication checker finds the task's outcome already exists.
    pub async fn discard(&self, task_id: &str) -> Option<Task> {
        let mut state = self.state.lock().await;
        let mut removed = None;
        let remaining: Vec<QueuedTask> = std::mem::take(&mut state.pending)
            .into_vec()
            .into_iter()
            .filter_map(|q| {
                if q.task.id == task_id && removed.is_none() {
                    removed = Some(q.task);
                    None
                } else {
                    Some(q)
                }
            })
            .collect();
        state.pending = remaining.into();
        if removed.is_some() {
            debug!(task_id = %task_id, "Discarded pending task");
        }
        removed
    }

    /// Returns the current status of a task, if the queue still tracks it.
    pub async fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.state.lock().await.current_status(task_id)
    }

    /// Whether the id has ever been accepted.
    pub async fn contains(&self, task_id: &str) -> bool {
        self.state.lock().await.known_ids.contains(task_id)
    }

    /// Pending tasks in dequeue order.
    pub async fn pending_tasks(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut queued: Vec<QueuedTask> = state.pending.iter().cloned().collect();
        drop(state);
        queued.sort_by(|a, b| b.cmp(a));
        queued.into_iter().map(|q| q.task).collect()
    }

    /// Tasks currently in progress.
    pub async fn in_progress_tasks(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut tasks: Vec<(u64, Task)> = state.in_progress.values().cloned().collect();
        drop(state);
        tasks.sort_by_key(|(seq, _)| *seq);
        tasks.into_iter().map(|(_, task)| task).collect()
    }

    /// The most recently finished tasks, newest last.
    pub async fn history(&self) -> Vec<Task> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    /// Returns the number of pending tasks.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Returns queue metrics.
    pub async fn metrics(&self) -> QueueMetrics {
        let state = self.state.lock().await;
        QueueMetrics {
            pending: state.pending.len(),
            in_progress: state.in_progress.len(),
            completed: state.completed,
            failed: state.failed,
        }
    }

    /// Captures the queue for checkpointing.
    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        let mut pending: Vec<QueuedTask> = state.pending.iter().cloned().collect();
        pending.sort_by(|a, b| b.cmp(a));
        let mut in_progress: Vec<(u64, Task)> = state.in_progress.values().cloned().collect();
        in_progress.sort_by_key(|(seq, _)| *seq);

        QueueSnapshot {
            pending: pending.into_iter().map(|q| q.task).collect(),
            in_progress: in_progress.into_iter().map(|(_, t)| t).collect(),
            history: state.history.iter().cloned().collect(),
            known_ids: state.known_ids.iter().cloned().collect(),
            completed: state.completed,
            failed: state.failed,
        }
    }

    /// Replaces the queue contents with a snapshot.
    ///
    /// Tasks that were in progress when the snapshot was taken go back to
    /// pending ahead of equal-priority work submitted later.
    pub async fn restore(&self, snapshot: QueueSnapshot) {
        let mut state = self.state.lock().await;
        let history_limit = state.history_limit;
        *state = QueueState::new(history_limit);

        let mut resumed = snapshot.in_progress;
        resumed.extend(snapshot.pending);
        for mut task in resumed {
            task.status = TaskStatus::Pending;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.known_ids.insert(task.id.clone());
            state.pending.push(QueuedTask { seq, task });
        }
        for task in snapshot.history {
            state.known_ids.insert(task.id.clone());
            state.history.push_back(task);
        }
        while state.history.len() > history_limit {
            state.history.pop_front();
        }
        state.known_ids.extend(snapshot.known_ids);
        state.completed = snapshot.completed;
        state.failed = snapshot.failed;
        debug!(pending = state.pending.len(), "Queue restored from snapshot");
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

/// Queue metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Number of pending tasks.
    pub pending: usize,
    /// Number of tasks currently executing.
    pub in_progress: usize,
    /// Number of tasks completed since the queue was created.
    pub completed: usize,
    /// Number of tasks failed since the queue was created.
    pub failed: usize,
}

impl QueueMetrics {
    /// Pending plus in-progress tasks.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.pending + self.in_progress
    }
}

/// Serializable queue contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Pending tasks in dequeue order.
    pub pending: Vec<Task>,
    /// Tasks that were executing.
    pub in_progress: Vec<Task>,
    /// Recently finished tasks.
    pub history: Vec<Task>,
    /// Every id the queue has accepted.
    pub known_ids: BTreeSet<String>,
    /// Lifetime completed count.
    pub completed: usize,
    /// Lifetime failed count.
    pub failed: usize,
}
