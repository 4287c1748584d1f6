use std::time::Duration;

/// Versioned prefix shared by every backend route.
pub const API_PREFIX: &str = "/api/v1";

pub const PROVIDERS_PATH: &str = "/api/v1/providers";
pub const ANALYZE_PATH: &str = "/api/v1/analysis/analyze";
pub const HISTORY_PATH: &str = "/api/v1/history";
pub const TASK_STREAM_PATH: &str = "/api/v1/analysis/tasks/stream";

/// Backend address used when neither the config file nor the CLI names one.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Report flavour requested for every dashboard submission.
pub const DEFAULT_REPORT_TYPE: &str = "detailed";

/// History rows fetched per page.
pub const HISTORY_PAGE_SIZE: u32 = 20;

/// History list covers this many days back from today.
pub const HISTORY_WINDOW_DAYS: i64 = 30;

/// How long a completed task stays in the task panel.
pub const COMPLETED_TASK_LINGER: Duration = Duration::from_secs(2);

/// How long a failed task stays in the task panel.
pub const FAILED_TASK_LINGER: Duration = Duration::from_secs(5);

/// Banner text when the backend reports a failure without a message.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Analysis failed";

/// Labels for provider keys written by dashboards that predate the
/// provider listing endpoint.
pub const LEGACY_DISPLAY_NAMES: &[(&str, &str)] = &[("openai", "DeepSeek"), ("gemini", "Gemini")];

/// Number of colour slots available to provider badges.
pub const BADGE_PALETTE_SIZE: usize = 7;
