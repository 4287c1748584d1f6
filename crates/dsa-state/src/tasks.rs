//! In-flight task tracking for the task panel.
//!
//! Tasks enter on `task_created` (or when a submission is acknowledged,
//! whichever comes first), move through `processing`, and leave the board a
//! short while after reaching a terminal state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dsa_protocol::{TaskInfo, TaskStatus, COMPLETED_TASK_LINGER, FAILED_TASK_LINGER};

/// A task shown in the task panel.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedTask {
    pub info: TaskInfo,
    /// When the task should disappear from the panel. Set once the task is
    /// terminal.
    pub remove_at: Option<Instant>,
}

impl TrackedTask {
    pub fn is_terminal(&self) -> bool {
        self.info.status.is_terminal()
    }
}

/// Ordered set of tracked tasks plus the request epoch each of our own
/// submissions was issued under.
#[derive(Debug, Clone, Default)]
pub struct TaskBoard {
    tasks: Vec<TrackedTask>,
    submitted_epochs: HashMap<String, u64>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[TrackedTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, task_id: &str) -> Option<&TrackedTask> {
        self.tasks.iter().find(|t| t.info.task_id == task_id)
    }

    fn get_mut(&mut self, task_id: &str) -> Option<&mut TrackedTask> {
        self.tasks.iter_mut().find(|t| t.info.task_id == task_id)
    }

    /// Start tracking `task`. Returns `false` if it is already tracked.
    pub fn insert(&mut self, task: TaskInfo) -> bool {
        if self.get(&task.task_id).is_some() {
            return false;
        }
        self.tasks.push(TrackedTask {
            info: task,
            remove_at: None,
        });
        true
    }

    /// Replace the snapshot of a tracked, non-terminal task.
    ///
    /// Fields the update leaves empty keep their previous value. Returns
    /// `false` for unknown or already-terminal tasks.
    pub fn update(&mut self, task: &TaskInfo) -> bool {
        let Some(tracked) = self.get_mut(&task.task_id) else {
            return false;
        };
        if tracked.is_terminal() {
            return false;
        }
        merge_task(&mut tracked.info, task);
        true
    }

    /// Move a tracked task to a terminal status and schedule its removal.
    /// Returns `false` for unknown or already-terminal tasks.
    pub fn finish(&mut self, task: &TaskInfo, status: TaskStatus, now: Instant) -> bool {
        let Some(tracked) = self.get_mut(&task.task_id) else {
            return false;
        };
        if tracked.is_terminal() {
            return false;
        }
        merge_task(&mut tracked.info, task);
        tracked.info.status = status;
        tracked.remove_at = Some(now + linger_for(status));
        true
    }

    /// Drop terminal tasks whose display time has passed. Returns how many
    /// were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.tasks.len();
        let mut expired = Vec::new();
        self.tasks.retain(|t| match t.remove_at {
            Some(at) if at <= now => {
                expired.push(t.info.task_id.clone());
                false
            }
            _ => true,
        });
        for id in expired {
            self.submitted_epochs.remove(&id);
        }
        before - self.tasks.len()
    }

    /// Remember the request epoch a task was submitted under.
    pub fn record_submission(&mut self, task_id: &str, epoch: u64) {
        self.submitted_epochs.insert(task_id.to_string(), epoch);
    }

    /// Epoch the task was submitted under, if it was submitted by us.
    pub fn submission_epoch(&self, task_id: &str) -> Option<u64> {
        self.submitted_epochs.get(task_id).copied()
    }
}

fn linger_for(status: TaskStatus) -> Duration {
    match status {
        TaskStatus::Failed => FAILED_TASK_LINGER,
        _ => COMPLETED_TASK_LINGER,
    }
}

fn merge_task(current: &mut TaskInfo, update: &TaskInfo) {
    current.status = update.status;
    if update.provider_key().is_some() {
        current.model_name = update.model_name.clone();
    }
    if !update.stock_code.is_empty() {
        current.stock_code = update.stock_code.clone();
    }
    if update.stock_name.is_some() {
        current.stock_name = update.stock_name.clone();
    }
    if update.error.is_some() {
        current.error = update.error.clone();
    }
    if update.progress.is_some() {
        current.progress = update.progress;
    }
    if update.message.is_some() {
        current.message = update.message.clone();
    }
    if update.created_at.is_some() {
        current.created_at = update.created_at.clone();
    }
}
