use thiserror::Error;

/// Rejection reasons for a stock code typed by the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("enter a stock code")]
    Empty,

    #[error("'{0}' is not a valid stock code (e.g. 600519, 00700, AAPL)")]
    Malformed(String),

    #[error("select at least one model")]
    NoModelSelected,
}

/// Errors surfaced by dashboard operations.
///
/// None of these are fatal: each one is scoped to the call that produced it.
#[derive(Debug, Clone, Error)]
pub enum DashboardError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("stock {stock_code} is already being analyzed")]
    DuplicateTask {
        stock_code: String,
        existing_task_id: Option<String>,
    },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected payload: {0}")]
    Decode(String),

    #[error("task stream disconnected: {0}")]
    StreamDisconnect(String),
}

impl DashboardError {
    /// Duplicate submissions are warnings, not failures.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DashboardError::DuplicateTask { .. })
    }
}
