//! In-process backend for tests and offline demos.
//!
//! Serves canned providers, reports and history, records every call, and
//! can be told to delay or fail individual calls so concurrency and
//! supersession can be exercised deterministically.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use dsa_protocol::{
    AnalysisReport, AnalyzeAccepted, AnalyzeRequest, DashboardError, HistoryItem, HistoryPage,
    HistoryQuery, ProviderInfo,
};

use crate::api::{AnalysisApi, ApiFuture};

#[derive(Default)]
struct MockInner {
    providers: Vec<ProviderInfo>,
    reports: HashMap<String, AnalysisReport>,
    history: Vec<HistoryItem>,
    analyze_failures: HashMap<String, DashboardError>,
    analyze_delays: HashMap<String, Duration>,
    report_delays: HashMap<String, Duration>,
    history_delays: HashMap<u32, Duration>,
    fail_history: Option<DashboardError>,
    analyze_calls: Vec<AnalyzeRequest>,
    report_calls: Vec<String>,
    history_calls: Vec<HistoryQuery>,
}

/// Mock [`AnalysisApi`].
#[derive(Default)]
pub struct MockApi {
    inner: Mutex<MockInner>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_providers(self, providers: Vec<ProviderInfo>) -> Self {
        self.lock().providers = providers;
        self
    }

    pub fn with_history(self, history: Vec<HistoryItem>) -> Self {
        self.lock().history = history;
        self
    }

    /// Serve `report` for `query_id`.
    pub fn insert_report(&self, query_id: &str, report: AnalysisReport) {
        self.lock().reports.insert(query_id.to_string(), report);
    }

    /// Make submissions for `model` fail with `error`.
    pub fn fail_analyze(&self, model: &str, error: DashboardError) {
        self.lock().analyze_failures.insert(model.to_string(), error);
    }

    /// Delay submissions for `model`.
    pub fn delay_analyze(&self, model: &str, delay: Duration) {
        self.lock().analyze_delays.insert(model.to_string(), delay);
    }

    /// Delay report fetches for `query_id`.
    pub fn delay_report(&self, query_id: &str, delay: Duration) {
        self.lock().report_delays.insert(query_id.to_string(), delay);
    }

    /// Add a record at the top of the history, as a new analysis would.
    pub fn prepend_history(&self, item: HistoryItem) {
        self.lock().history.insert(0, item);
    }

    /// Delay responses for history page `page`. The rows are read when the
    /// call is made, not when it resolves.
    pub fn delay_history_page(&self, page: u32, delay: Duration) {
        self.lock().history_delays.insert(page, delay);
    }

    /// Make every history call fail with `error` (`None` restores service).
    pub fn fail_history(&self, error: Option<DashboardError>) {
        self.lock().fail_history = error;
    }

    pub fn analyze_calls(&self) -> Vec<AnalyzeRequest> {
        self.lock().analyze_calls.clone()
    }

    pub fn report_calls(&self) -> Vec<String> {
        self.lock().report_calls.clone()
    }

    pub fn history_calls(&self) -> Vec<HistoryQuery> {
        self.lock().history_calls.clone()
    }
}

impl AnalysisApi for MockApi {
    fn list_providers(&self) -> ApiFuture<'_, Vec<ProviderInfo>> {
        let providers = self.lock().providers.clone();
        Box::pin(async move { Ok(providers) })
    }

    fn analyze_async<'a>(&'a self, request: &'a AnalyzeRequest) -> ApiFuture<'a, AnalyzeAccepted> {
        let (delay, failure) = {
            let mut inner = self.lock();
            inner.analyze_calls.push(request.clone());
            (
                inner.analyze_delays.get(&request.model_name).copied(),
                inner.analyze_failures.get(&request.model_name).cloned(),
            )
        };

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = failure {
                return Err(err);
            }
            Ok(AnalyzeAccepted {
                task_id: uuid::Uuid::new_v4().to_string(),
                status: Some("pending".to_string()),
            })
        })
    }

    fn history_list<'a>(&'a self, query: &'a HistoryQuery) -> ApiFuture<'a, HistoryPage> {
        let (delay, result) = {
            let mut inner = self.lock();
            inner.history_calls.push(query.clone());
            let delay = inner.history_delays.get(&query.page).copied();
            let result = match &inner.fail_history {
                Some(err) => Err(err.clone()),
                None => {
                    let limit = query.limit.max(1) as usize;
                    let start = (query.page.max(1) as usize - 1) * limit;
                    Ok(HistoryPage {
                        items: inner.history.iter().skip(start).take(limit).cloned().collect(),
                        total: inner.history.len() as u64,
                    })
                }
            };
            (delay, result)
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }

    fn report_detail<'a>(&'a self, query_id: &'a str) -> ApiFuture<'a, AnalysisReport> {
        let (delay, report) = {
            let mut inner = self.lock();
            inner.report_calls.push(query_id.to_string());
            (
                inner.report_delays.get(query_id).copied(),
                inner.reports.get(query_id).cloned(),
            )
        };

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            report.ok_or_else(|| DashboardError::Http {
                status: 404,
                message: format!("report {query_id} not found"),
            })
        })
    }
}
