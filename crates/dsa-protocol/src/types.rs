//! Payload shapes exchanged with the analysis backend.
//!
//! Response types deserialize from camelCase keys: the client rewrites the
//! backend's snake_case keys before decoding (see `dsa_client::casing`).

use serde::{Deserialize, Serialize};

/// Public description of a configured AI provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    /// Stable identifier, e.g. `gemini`, `openai`, `qwen`.
    pub key: String,
    pub display_name: String,
    /// `gemini` or `openai_compatible`.
    #[serde(default)]
    pub provider_type: String,
    /// Default model served by the provider.
    #[serde(default, alias = "model")]
    pub model_name: Option<String>,
}

impl ProviderInfo {
    pub fn new(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            provider_type: String::new(),
            model_name: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderList {
    #[serde(default)]
    pub providers: Vec<ProviderInfo>,
}

/// Lifecycle status reported by the backend for an analysis task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// An asynchronous analysis task as reported by the task stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_id: String,
    /// Provider key the task runs against. Absent on legacy tasks.
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stock_code: String,
    #[serde(default)]
    pub stock_name: Option<String>,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl TaskInfo {
    pub fn new(task_id: impl Into<String>, stock_code: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            stock_code: stock_code.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_name = Some(model.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Provider key, treating an empty string as absent.
    pub fn provider_key(&self) -> Option<&str> {
        self.model_name.as_deref().filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReportMeta {
    pub query_id: String,
    pub stock_code: String,
    #[serde(default)]
    pub stock_name: Option<String>,
    /// Provider key that produced the report. Absent on legacy records.
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub report_type: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub change_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    #[serde(default)]
    pub sentiment_score: i32,
    #[serde(default)]
    pub analysis_summary: String,
    #[serde(default)]
    pub operation_advice: String,
    #[serde(default)]
    pub trend_prediction: String,
    #[serde(default)]
    pub sentiment_label: Option<String>,
}

/// Price levels suggested by the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReportStrategy {
    #[serde(default)]
    pub ideal_buy: Option<String>,
    #[serde(default)]
    pub secondary_buy: Option<String>,
    #[serde(default)]
    pub stop_loss: Option<String>,
    #[serde(default)]
    pub take_profit: Option<String>,
}

impl ReportStrategy {
    /// Labelled strategy points in display order.
    pub fn points(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("Ideal buy", self.ideal_buy.as_deref()),
            ("Secondary buy", self.secondary_buy.as_deref()),
            ("Stop loss", self.stop_loss.as_deref()),
            ("Take profit", self.take_profit.as_deref()),
        ]
    }
}

/// A finished analysis report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub meta: ReportMeta,
    #[serde(default)]
    pub summary: ReportSummary,
    #[serde(default)]
    pub strategy: Option<ReportStrategy>,
}

impl AnalysisReport {
    /// Provider key the report belongs to, if it was produced by a
    /// provider-aware backend.
    pub fn provider_key(&self) -> Option<&str> {
        self.meta.model_name.as_deref().filter(|m| !m.is_empty())
    }
}

/// One row of the analysis history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub query_id: String,
    pub stock_code: String,
    #[serde(default)]
    pub stock_name: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub sentiment_score: Option<i32>,
    #[serde(default)]
    pub created_at: String,
}

impl HistoryItem {
    /// Name shown in lists: stock name when known, else the code.
    pub fn title(&self) -> &str {
        self.stock_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.stock_code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default)]
    pub items: Vec<HistoryItem>,
    #[serde(default)]
    pub total: u64,
}

/// Query parameters of the history list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryQuery {
    /// Inclusive, `YYYY-MM-DD`.
    pub start_date: String,
    /// Inclusive, `YYYY-MM-DD`.
    pub end_date: String,
    /// 1-indexed.
    pub page: u32,
    pub limit: u32,
}

impl HistoryQuery {
    /// Query covering the `window_days` days up to and including `today`.
    pub fn recent(today: chrono::NaiveDate, window_days: i64, page: u32, limit: u32) -> Self {
        let start = today - chrono::Duration::days(window_days);
        Self {
            start_date: start.format("%Y-%m-%d").to_string(),
            end_date: today.format("%Y-%m-%d").to_string(),
            page,
            limit,
        }
    }
}

/// Body of the asynchronous analyze endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzeRequest {
    pub stock_code: String,
    pub report_type: String,
    pub model_name: String,
    pub async_mode: bool,
}

impl AnalyzeRequest {
    pub fn new(stock_code: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            stock_code: stock_code.into(),
            report_type: crate::DEFAULT_REPORT_TYPE.to_string(),
            model_name: model_name.into(),
            async_mode: true,
        }
    }
}

/// Acknowledgement of an accepted analyze request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeAccepted {
    pub task_id: String,
    #[serde(default)]
    pub status: Option<String>,
}
