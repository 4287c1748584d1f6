//! DSA State - Reconciliation core of the stock analysis dashboard
//!
//! [`DashboardState`] holds everything the view renders: per-provider
//! reports and spinners, the derived model tabs, the task board and the
//! history list. [`Reconciler`] performs the asynchronous operations against
//! an [`dsa_client::AnalysisApi`] and guards the report area with a
//! monotonic request epoch so late responses never overwrite newer ones.

pub mod history;
pub mod log;
pub mod reconciler;
pub mod state;
pub mod tasks;

pub use history::HistoryView;
pub use log::{LogCategory, LogEntry, EVENT_LOG_CAPACITY};
pub use reconciler::{
    Reconciler, ReconcilerConfig, ReportRouting, SubmissionOutcome, TaskEventOutcome,
};
pub use state::{DashboardState, ProviderSlots, StreamStatus, TabInfo};
pub use tasks::{TaskBoard, TrackedTask};
