/// Maximum entries kept in [`crate::DashboardState::event_log`].
pub const EVENT_LOG_CAPACITY: usize = 500;

/// What an event log entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    System,
    Task,
    Report,
    History,
    Stream,
    Warning,
    Error,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Task => "task",
            Self::Report => "report",
            Self::History => "history",
            Self::Stream => "stream",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// One user-facing event shown in the console output.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub category: LogCategory,
    pub message: String,
}
