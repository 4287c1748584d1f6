use serde::{Deserialize, Serialize};

use crate::types::TaskInfo;

/// Task lifecycle transitions pushed over the task stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskEventKind {
    Created,
    Started,
    Completed,
    Failed,
}

impl TaskEventKind {
    /// Returns the SSE event name for this transition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "task_created",
            Self::Started => "task_started",
            Self::Completed => "task_completed",
            Self::Failed => "task_failed",
        }
    }

    /// Parse an SSE event name. Stream housekeeping events such as
    /// `connected` and `heartbeat` are not task transitions.
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "task_created" => Some(Self::Created),
            "task_started" => Some(Self::Started),
            "task_completed" => Some(Self::Completed),
            "task_failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A task transition together with the task snapshot it carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task: TaskInfo,
}

impl TaskEvent {
    pub fn new(kind: TaskEventKind, task: TaskInfo) -> Self {
        Self { kind, task }
    }

    pub fn created(task: TaskInfo) -> Self {
        Self::new(TaskEventKind::Created, task)
    }

    pub fn started(task: TaskInfo) -> Self {
        Self::new(TaskEventKind::Started, task)
    }

    pub fn completed(task: TaskInfo) -> Self {
        Self::new(TaskEventKind::Completed, task)
    }

    pub fn failed(task: TaskInfo) -> Self {
        Self::new(TaskEventKind::Failed, task)
    }

    pub fn task_id(&self) -> &str {
        &self.task.task_id
    }
}
