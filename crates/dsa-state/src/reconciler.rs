//! Asynchronous operations over [`DashboardState`].
//!
//! The [`Reconciler`] owns nothing but handles: the backend API and the
//! shared state. Each operation takes the state lock, mutates, releases it
//! before any network await, and re-checks the request epoch after the
//! await before touching the report area again.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinError, JoinSet};

use dsa_client::{AnalysisApi, StreamMessage};
use dsa_protocol::{
    validate_stock_code, AnalysisReport, AnalyzeAccepted, AnalyzeRequest, DashboardError,
    HistoryQuery, TaskEvent, TaskEventKind, TaskInfo, TaskStatus, ValidationError,
    DEFAULT_FAILURE_MESSAGE, HISTORY_PAGE_SIZE, HISTORY_WINDOW_DAYS,
};

use crate::log::LogCategory;
use crate::state::{DashboardState, StreamStatus};

/// History paging settings.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub history_page_size: u32,
    /// The history list covers this many days back from today.
    pub history_window_days: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            history_page_size: HISTORY_PAGE_SIZE,
            history_window_days: HISTORY_WINDOW_DAYS,
        }
    }
}

/// Result of one provider's submission.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub model: String,
    pub label: String,
    pub result: Result<AnalyzeAccepted, DashboardError>,
}

/// Where a fetched report ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportRouting {
    /// Stored under this provider key, whose tab is now active.
    Provider(String),
    /// Stored in the legacy single-report slot.
    Legacy,
    /// Dropped because a newer request replaced the report area.
    Superseded,
}

/// Effect of a task stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEventOutcome {
    /// Unknown task, repeated creation, or a task that already finished.
    Ignored,
    /// The task board (and for failures, the provider view) was updated.
    Applied,
    /// The completed task's report was stored under this provider key.
    ReportLoaded(String),
    /// The completed task belongs to a replaced request; its report was not
    /// shown.
    ReportSuperseded,
    /// The completed task's report could not be fetched.
    ReportUnavailable,
}

/// Drives [`DashboardState`] from user actions and task stream events.
pub struct Reconciler<A: ?Sized> {
    api: Arc<A>,
    state: Arc<RwLock<DashboardState>>,
    config: ReconcilerConfig,
}

impl<A: ?Sized> Clone for Reconciler<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            state: Arc::clone(&self.state),
            config: self.config.clone(),
        }
    }
}

impl<A: AnalysisApi + ?Sized> Reconciler<A> {
    pub fn new(api: Arc<A>, state: Arc<RwLock<DashboardState>>) -> Self {
        Self::with_config(api, state, ReconcilerConfig::default())
    }

    pub fn with_config(
        api: Arc<A>,
        state: Arc<RwLock<DashboardState>>,
        config: ReconcilerConfig,
    ) -> Self {
        Self { api, state, config }
    }

    pub fn state(&self) -> &Arc<RwLock<DashboardState>> {
        &self.state
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    // ── Providers ───────────────────────────────────────────────────

    /// Fetch the provider list and install it. Returns the provider count.
    pub async fn load_providers(&self) -> Result<usize, DashboardError> {
        let result = self.api.list_providers().await;
        let mut state = self.state.write().await;
        match result {
            Ok(providers) => {
                let count = providers.len();
                tracing::info!(count, "Providers loaded");
                state.set_providers(providers);
                state.push_log(LogCategory::System, format!("{count} provider(s) available"));
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch providers");
                state.push_log(LogCategory::Error, format!("Failed to fetch providers: {e}"));
                Err(e)
            }
        }
    }

    pub async fn toggle_model(&self, key: &str) -> bool {
        self.state.write().await.toggle_model(key)
    }

    pub async fn select_tab(&self, key: &str) {
        self.state.write().await.select_tab(key);
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Validate `raw_code` and submit it once per provider in `models`.
    ///
    /// Submissions run concurrently and settle independently: a failure is
    /// attributed to its provider and never cancels the others. Returns one
    /// outcome per provider in `models` order. Only validation problems are
    /// returned as `Err`, in which case nothing is sent.
    pub async fn submit_analysis(
        &self,
        raw_code: &str,
        models: &[String],
    ) -> Result<Vec<SubmissionOutcome>, DashboardError> {
        let code = match validate_stock_code(raw_code) {
            Ok(code) if !models.is_empty() => code,
            Ok(_) => return Err(self.reject_input(ValidationError::NoModelSelected).await),
            Err(e) => return Err(self.reject_input(e).await),
        };

        let (epoch, labels) = {
            let mut state = self.state.write().await;
            let epoch = state.begin_submission(models);
            let labels: Vec<String> = models.iter().map(|m| state.label(m)).collect();
            state.push_log(
                LogCategory::Task,
                format!("Submitting {code} to {}", labels.join(", ")),
            );
            (epoch, labels)
        };

        let requests: Vec<AnalyzeRequest> = models
            .iter()
            .map(|m| AnalyzeRequest::new(code.as_str(), m.as_str()))
            .collect();

        let code = code.as_str();
        let outcomes = join_all(requests.iter().zip(labels).map(|(request, label)| async move {
            let result = self.api.analyze_async(request).await;
            self.apply_submission(epoch, code, &request.model_name, &label, &result)
                .await;
            SubmissionOutcome {
                model: request.model_name.clone(),
                label,
                result,
            }
        }))
        .await;

        let mut state = self.state.write().await;
        state.is_analyzing = false;
        if state.is_current(epoch) {
            state.stock_input.clear();
        }
        Ok(outcomes)
    }

    async fn reject_input(&self, error: ValidationError) -> DashboardError {
        self.state.write().await.input_error = Some(error.to_string());
        DashboardError::Validation(error)
    }

    async fn apply_submission(
        &self,
        epoch: u64,
        code: &str,
        model: &str,
        label: &str,
        result: &Result<AnalyzeAccepted, DashboardError>,
    ) {
        let mut state = self.state.write().await;
        match result {
            Ok(accepted) => {
                tracing::info!(task_id = %accepted.task_id, stock = %code, model = %model, "Analysis submitted");
                state.tasks.record_submission(&accepted.task_id, epoch);
                state
                    .tasks
                    .insert(TaskInfo::new(accepted.task_id.as_str(), code).with_model(model));
                state.push_log(
                    LogCategory::Task,
                    format!("Queued {code} on {label} ({})", accepted.task_id),
                );
            }
            Err(DashboardError::DuplicateTask { stock_code, .. }) => {
                tracing::warn!(stock = %code, model = %model, "Analysis already running");
                if state.is_current(epoch) {
                    let stock = if stock_code.is_empty() { code } else { stock_code.as_str() };
                    let notice = format!("{stock} ({label}) is already being analyzed, wait for it to finish");
                    state.set_loading(model, false);
                    state.duplicate_notice = Some(notice.clone());
                    state.push_log(LogCategory::Warning, notice);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, stock = %code, model = %model, "Analysis submission failed");
                if state.is_current(epoch) {
                    state.set_loading(model, false);
                    state.error_banner = Some(format!("{label}: {e}"));
                    state.push_log(LogCategory::Error, format!("{label} submission failed: {e}"));
                }
            }
        }
    }

    // ── Reports ─────────────────────────────────────────────────────

    /// Show the report of a history record.
    ///
    /// Starts a new request epoch; if another selection or submission
    /// starts before the fetch resolves, the result is dropped.
    pub async fn on_history_select(&self, query_id: &str) -> Result<ReportRouting, DashboardError> {
        let epoch = self.state.write().await.begin_history_select();
        self.fetch_and_route(epoch, query_id).await
    }

    async fn fetch_and_route(&self, epoch: u64, query_id: &str) -> Result<ReportRouting, DashboardError> {
        let result = self.api.report_detail(query_id).await;

        let mut state = self.state.write().await;
        if !state.is_current(epoch) {
            tracing::debug!(query_id, "Discarding report of a superseded selection");
            return Ok(ReportRouting::Superseded);
        }
        state.is_loading_report = false;

        match result {
            Ok(report) => Ok(route_report(&mut state, report)),
            Err(e) => {
                tracing::warn!(error = %e, query_id, "Failed to fetch report");
                state.push_log(LogCategory::Error, format!("Failed to load report {query_id}: {e}"));
                Err(e)
            }
        }
    }

    // ── History ─────────────────────────────────────────────────────

    fn history_query(&self, page: u32) -> HistoryQuery {
        HistoryQuery::recent(
            chrono::Local::now().date_naive(),
            self.config.history_window_days,
            page,
            self.config.history_page_size,
        )
    }

    /// Reload the first history page.
    ///
    /// With `auto_select_first`, the newest record's report is opened when
    /// the report area is idle.
    pub async fn refresh_history(&self, auto_select_first: bool) -> Result<(), DashboardError> {
        let generation = self.state.write().await.history.begin_refresh();

        let result = self.api.history_list(&self.history_query(1)).await;

        let auto_select = {
            let mut state = self.state.write().await;
            if state.history.generation != generation {
                tracing::debug!("Dropping history page superseded by a newer refresh");
                return Ok(());
            }
            state.history.is_loading = false;
            match result {
                Ok(page) => {
                    let first = page.items.first().map(|i| i.query_id.clone());
                    tracing::debug!(rows = page.items.len(), total = page.total, "History refreshed");
                    state.history.apply_first_page(page);
                    match first {
                        Some(query_id) if auto_select_first && state.is_report_area_idle() => {
                            Some((state.begin_history_select(), query_id))
                        }
                        _ => None,
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to fetch history");
                    state.push_log(LogCategory::Error, format!("Failed to load history: {e}"));
                    return Err(e);
                }
            }
        };

        if let Some((epoch, query_id)) = auto_select {
            if let Err(e) = self.fetch_and_route(epoch, &query_id).await {
                tracing::debug!(error = %e, "Could not open the newest history record");
            }
        }
        Ok(())
    }

    /// Append the next history page. Returns `false` when there is nothing
    /// to load or a load is already in flight.
    pub async fn load_more_history(&self) -> Result<bool, DashboardError> {
        let (next, generation) = {
            let mut state = self.state.write().await;
            if !state.history.can_load_more() {
                return Ok(false);
            }
            state.history.is_loading_more = true;
            (state.history.page + 1, state.history.generation)
        };

        let result = self.api.history_list(&self.history_query(next)).await;

        let mut state = self.state.write().await;
        state.history.is_loading_more = false;
        match result {
            Ok(page) if state.history.generation == generation && state.history.page + 1 == next => {
                state.history.apply_next_page(next, page);
                Ok(true)
            }
            Ok(_) => {
                tracing::debug!(page = next, "Dropping history page loaded across a refresh");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(error = %e, page = next, "Failed to load more history");
                state.push_log(LogCategory::Error, format!("Failed to load more history: {e}"));
                Err(e)
            }
        }
    }

    // ── Task stream ─────────────────────────────────────────────────

    /// Apply one message from the task stream subscriber.
    pub async fn on_stream_message(&self, message: StreamMessage) -> Option<TaskEventOutcome> {
        match message {
            StreamMessage::Task(event) => Some(self.on_task_event(event).await),
            StreamMessage::Connected => {
                if self.mark_connected().await {
                    self.refresh_after_reconnect().await;
                }
                None
            }
            StreamMessage::Disconnected { reason, attempt } => {
                let mut state = self.state.write().await;
                if attempt == 1 {
                    state.push_log(LogCategory::Stream, format!("Task stream lost ({reason}), reconnecting"));
                }
                state.stream_status = StreamStatus::Reconnecting { attempt };
                None
            }
            StreamMessage::GaveUp { attempts } => {
                let mut state = self.state.write().await;
                state.stream_status = StreamStatus::Offline;
                state.push_log(
                    LogCategory::Error,
                    format!("Task stream offline after {attempts} attempts"),
                );
                None
            }
        }
    }

    /// Returns whether the stream was reconnecting.
    async fn mark_connected(&self) -> bool {
        let mut state = self.state.write().await;
        let was = matches!(state.stream_status, StreamStatus::Reconnecting { .. });
        state.stream_status = StreamStatus::Connected;
        state.push_log(LogCategory::Stream, "Task stream connected".to_string());
        was
    }

    // Completions may have been missed while disconnected.
    async fn refresh_after_reconnect(&self) {
        if let Err(e) = self.refresh_history(false).await {
            tracing::debug!(error = %e, "History refresh after reconnect failed");
        }
    }

    /// Apply stream messages until every sender is gone.
    ///
    /// Task board transitions are applied in arrival order. The network
    /// work that follows a completion or a reconnect (history refresh and
    /// report fetch) runs on spawned tasks so later events are not held
    /// behind it; the request epoch decides whether a late report is shown.
    pub async fn run_stream(&self, mut rx: mpsc::Receiver<StreamMessage>)
    where
        A: 'static,
    {
        let mut follow_ups = JoinSet::new();
        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    match message {
                        StreamMessage::Task(TaskEvent { kind: TaskEventKind::Completed, task }) => {
                            if let Some(completion) = self.begin_completion(task, Instant::now()).await {
                                let this = self.clone();
                                follow_ups.spawn(async move {
                                    this.finish_completion(completion).await;
                                });
                            }
                        }
                        StreamMessage::Connected => {
                            if self.mark_connected().await {
                                let this = self.clone();
                                follow_ups.spawn(async move { this.refresh_after_reconnect().await });
                            }
                        }
                        other => {
                            self.on_stream_message(other).await;
                        }
                    }
                }
                Some(joined) = follow_ups.join_next(), if !follow_ups.is_empty() => {
                    log_follow_up(joined);
                }
            }
        }
        while let Some(joined) = follow_ups.join_next().await {
            log_follow_up(joined);
        }
        tracing::debug!("Task stream channel closed");
    }

    /// Apply a task lifecycle event.
    ///
    /// Events are idempotent: repeated creations, events for tasks that are
    /// not tracked, and events for tasks that already finished are ignored.
    pub async fn on_task_event(&self, event: TaskEvent) -> TaskEventOutcome {
        let now = Instant::now();
        match event.kind {
            TaskEventKind::Created => {
                let mut state = self.state.write().await;
                if !state.tasks.insert(event.task.clone()) {
                    return TaskEventOutcome::Ignored;
                }
                let label = event
                    .task
                    .provider_key()
                    .map(|k| state.label(k))
                    .unwrap_or_else(|| "-".to_string());
                state.push_log(
                    LogCategory::Task,
                    format!("Task {} created: {} on {label}", event.task.task_id, event.task.stock_code),
                );
                TaskEventOutcome::Applied
            }
            TaskEventKind::Started => {
                let mut state = self.state.write().await;
                if state.tasks.update(&event.task) {
                    TaskEventOutcome::Applied
                } else {
                    TaskEventOutcome::Ignored
                }
            }
            TaskEventKind::Failed => self.fail_task(event.task, now).await,
            TaskEventKind::Completed => self.complete_task(event.task, now).await,
        }
    }

    async fn fail_task(&self, task: TaskInfo, now: Instant) -> TaskEventOutcome {
        let mut state = self.state.write().await;
        if !state.tasks.finish(&task, TaskStatus::Failed, now) {
            return TaskEventOutcome::Ignored;
        }

        let model = tracked_provider(&state, &task.task_id);
        let in_view = state
            .tasks
            .submission_epoch(&task.task_id)
            .map_or(true, |e| state.is_current(e));
        if let (Some(model), true) = (&model, in_view) {
            state.set_loading(model, false);
        }

        let message = task
            .error
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_FAILURE_MESSAGE)
            .to_string();
        tracing::warn!(task_id = %task.task_id, model = ?model, error = %message, "Analysis task failed");
        state.push_log(
            LogCategory::Error,
            format!("Task {} ({}) failed: {message}", task.task_id, task.stock_code),
        );
        state.error_banner = Some(message);
        TaskEventOutcome::Applied
    }

    async fn complete_task(&self, task: TaskInfo, now: Instant) -> TaskEventOutcome {
        match self.begin_completion(task, now).await {
            Some(completion) => self.finish_completion(completion).await,
            None => TaskEventOutcome::Ignored,
        }
    }

    /// Mark the task completed on the board. `None` when the event is stale.
    async fn begin_completion(&self, task: TaskInfo, now: Instant) -> Option<Completion> {
        let mut state = self.state.write().await;
        if !state.tasks.finish(&task, TaskStatus::Completed, now) {
            return None;
        }
        let model = tracked_provider(&state, &task.task_id);
        let in_view = state
            .tasks
            .submission_epoch(&task.task_id)
            .map_or(true, |e| state.is_current(e));
        state.push_log(LogCategory::Task, format!("Task {} completed", task.task_id));
        tracing::info!(task_id = %task.task_id, model = ?model, "Analysis task completed");
        Some(Completion {
            epoch: state.epoch(),
            task,
            model,
            in_view,
        })
    }

    /// Refresh the history and fetch the completed task's report.
    async fn finish_completion(&self, completion: Completion) -> TaskEventOutcome {
        let Completion {
            task,
            model,
            in_view,
            epoch,
        } = completion;

        if let Err(e) = self.refresh_history(false).await {
            tracing::debug!(error = %e, "History refresh after completion failed");
        }

        let Some(model) = model else {
            return TaskEventOutcome::Applied;
        };
        if !in_view {
            return TaskEventOutcome::ReportSuperseded;
        }

        let result = self.api.report_detail(&task.task_id).await;

        let mut state = self.state.write().await;
        if !state.is_current(epoch) {
            return TaskEventOutcome::ReportSuperseded;
        }
        match result {
            Ok(report) => {
                let label = state.label(&model);
                state.set_report(&model, report);
                state.push_log(LogCategory::Report, format!("{label} report ready for {}", task.stock_code));
                TaskEventOutcome::ReportLoaded(model)
            }
            Err(e) => {
                tracing::warn!(error = %e, task_id = %task.task_id, "Failed to load task result");
                state.set_loading(&model, false);
                state.push_log(LogCategory::Error, format!("Failed to load result of {}: {e}", task.task_id));
                TaskEventOutcome::ReportUnavailable
            }
        }
    }

    /// Remove finished tasks whose display time has passed.
    pub async fn prune_finished_tasks(&self, now: Instant) -> usize {
        self.state.write().await.prune_finished_tasks(now)
    }
}

/// A completed task whose report is still to be fetched.
struct Completion {
    task: TaskInfo,
    model: Option<String>,
    in_view: bool,
    epoch: u64,
}

fn log_follow_up(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Task stream follow-up panicked");
    }
}

fn tracked_provider(state: &DashboardState, task_id: &str) -> Option<String> {
    state
        .tasks
        .get(task_id)
        .and_then(|t| t.info.provider_key())
        .map(str::to_string)
}

fn route_report(state: &mut DashboardState, report: AnalysisReport) -> ReportRouting {
    match report.provider_key().map(str::to_string) {
        Some(key) => {
            state.set_report(&key, report);
            state.select_tab(&key);
            ReportRouting::Provider(key)
        }
        None => {
            state.set_legacy_report(report);
            ReportRouting::Legacy
        }
    }
}
