//! The dashboard state container.
//!
//! Every mutation of the per-provider maps goes through a method that
//! recomputes the visible tabs and re-validates the active tab before
//! returning, so readers never observe an active tab that is hidden while
//! another tab is visible.

use std::time::Instant;

use dsa_protocol::{AnalysisReport, DisplayNames, ProviderInfo};

use crate::history::HistoryView;
use crate::log::{LogCategory, LogEntry, EVENT_LOG_CAPACITY};
use crate::tasks::TaskBoard;

/// Insertion-ordered map keyed by provider key.
#[derive(Debug, Clone)]
pub struct ProviderSlots<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for ProviderSlots<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> ProviderSlots<T> {
    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Set `key`, keeping its original position when already present.
    pub fn set(&mut self, key: &str, value: T) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A model tab in the report area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub key: String,
    pub label: String,
    pub loading: bool,
    pub has_report: bool,
}

/// Connection state of the task stream as shown in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamStatus {
    #[default]
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Retries exhausted.
    Offline,
    /// Disabled in configuration.
    Disabled,
}

/// All state behind the dashboard view.
#[derive(Debug, Clone)]
pub struct DashboardState {
    /// Providers in backend order.
    providers: Vec<ProviderInfo>,
    display_names: DisplayNames,
    selected_models: Vec<String>,
    /// Current contents of the stock code input.
    pub stock_input: String,
    /// Validation message shown under the input.
    pub input_error: Option<String>,
    /// Warning about a stock already being analyzed.
    pub duplicate_notice: Option<String>,
    /// Last analysis failure.
    pub error_banner: Option<String>,
    report_by_model: ProviderSlots<AnalysisReport>,
    loading_by_model: ProviderSlots<bool>,
    /// Report of a history record that predates provider tagging.
    selected_report: Option<AnalysisReport>,
    /// A report fetch triggered from the history list is in flight.
    pub is_loading_report: bool,
    /// A submission fan-out is in flight.
    pub is_analyzing: bool,
    active_tab: String,
    visible_tabs: Vec<TabInfo>,
    /// Tasks shown in the task panel.
    pub tasks: TaskBoard,
    pub history: HistoryView,
    request_epoch: u64,
    pub stream_status: StreamStatus,
    /// User-facing event log, capped at [`EVENT_LOG_CAPACITY`] entries.
    pub event_log: Vec<LogEntry>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self::new(DisplayNames::with_legacy_defaults())
    }
}

impl DashboardState {
    pub fn new(display_names: DisplayNames) -> Self {
        Self {
            providers: Vec::new(),
            display_names,
            selected_models: Vec::new(),
            stock_input: String::new(),
            input_error: None,
            duplicate_notice: None,
            error_banner: None,
            report_by_model: ProviderSlots::default(),
            loading_by_model: ProviderSlots::default(),
            selected_report: None,
            is_loading_report: false,
            is_analyzing: false,
            active_tab: String::new(),
            visible_tabs: Vec::new(),
            tasks: TaskBoard::new(),
            history: HistoryView::default(),
            request_epoch: 0,
            stream_status: StreamStatus::default(),
            event_log: Vec::new(),
        }
    }

    /// Push a log entry, capping the log at [`EVENT_LOG_CAPACITY`] entries.
    pub fn push_log(&mut self, category: LogCategory, message: String) {
        if self.event_log.len() >= EVENT_LOG_CAPACITY {
            self.event_log.remove(0);
        }
        self.event_log.push(LogEntry {
            timestamp: chrono::Utc::now(),
            category,
            message,
        });
    }

    // ── Providers and selection ─────────────────────────────────────

    pub fn providers(&self) -> &[ProviderInfo] {
        &self.providers
    }

    pub fn display_names(&self) -> &DisplayNames {
        &self.display_names
    }

    /// Human-readable label for a provider key.
    pub fn label(&self, key: &str) -> String {
        self.display_names.label(key).to_string()
    }

    /// Install the backend provider list. Selects the first provider when
    /// nothing is selected, and makes it the active tab when none is set.
    pub fn set_providers(&mut self, providers: Vec<ProviderInfo>) {
        self.display_names.merge_providers(&providers);
        if let Some(first) = providers.first() {
            if self.selected_models.is_empty() {
                self.selected_models.push(first.key.clone());
            }
            if self.active_tab.is_empty() {
                self.active_tab = first.key.clone();
            }
        }
        self.providers = providers;
        self.refresh_tabs();
    }

    /// Whether `key` names a provider from the backend list. Every key is
    /// accepted until the list has loaded.
    pub fn is_known_provider(&self, key: &str) -> bool {
        self.providers.is_empty() || self.providers.iter().any(|p| p.key == key)
    }

    pub fn selected_models(&self) -> &[String] {
        &self.selected_models
    }

    /// Add `key` to the selection, or remove it unless it is the last one.
    /// Unknown providers are never added. Returns whether the selection
    /// changed.
    pub fn toggle_model(&mut self, key: &str) -> bool {
        if let Some(pos) = self.selected_models.iter().position(|m| m == key) {
            if self.selected_models.len() <= 1 {
                return false;
            }
            self.selected_models.remove(pos);
        } else if self.is_known_provider(key) {
            self.selected_models.push(key.to_string());
        } else {
            tracing::debug!(key, "Ignoring unknown provider");
            return false;
        }
        true
    }

    /// Replace the selection, skipping unknown providers. A list with no
    /// known provider leaves it unchanged.
    pub fn set_selected_models(&mut self, models: Vec<String>) {
        let mut deduped: Vec<String> = Vec::with_capacity(models.len());
        for m in models {
            if !deduped.contains(&m) && self.is_known_provider(&m) {
                deduped.push(m);
            }
        }
        if deduped.is_empty() {
            return;
        }
        self.selected_models = deduped;
    }

    // ── Per-provider views ──────────────────────────────────────────

    pub fn report_for(&self, key: &str) -> Option<&AnalysisReport> {
        self.report_by_model.get(key)
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.loading_by_model.get(key).copied().unwrap_or(false)
    }

    pub fn reports(&self) -> &ProviderSlots<AnalysisReport> {
        &self.report_by_model
    }

    pub fn selected_report(&self) -> Option<&AnalysisReport> {
        self.selected_report.as_ref()
    }

    pub fn active_tab(&self) -> &str {
        &self.active_tab
    }

    /// Tabs for providers that are loading or hold a report: backend
    /// providers first in list order, then unlisted keys in discovery order.
    pub fn visible_tabs(&self) -> &[TabInfo] {
        &self.visible_tabs
    }

    /// Make `key` the active tab and drop the legacy report.
    pub fn select_tab(&mut self, key: &str) {
        self.active_tab = key.to_string();
        self.selected_report = None;
        self.correct_active_tab();
    }

    pub fn set_loading(&mut self, key: &str, loading: bool) {
        self.loading_by_model.set(key, loading);
        self.refresh_tabs();
    }

    /// Store a provider's report and stop its spinner.
    pub fn set_report(&mut self, key: &str, report: AnalysisReport) {
        self.report_by_model.set(key, report);
        self.loading_by_model.set(key, false);
        self.refresh_tabs();
    }

    /// Store a report of a history record without a provider tag.
    pub fn set_legacy_report(&mut self, report: AnalysisReport) {
        self.selected_report = Some(report);
        if let Some(first) = self.providers.first() {
            self.active_tab = first.key.clone();
        }
        self.correct_active_tab();
    }

    /// Report shown in the report panel.
    pub fn current_report(&self) -> Option<&AnalysisReport> {
        self.report_by_model
            .get(&self.active_tab)
            .or(self.selected_report.as_ref())
    }

    /// Whether the report panel shows a spinner.
    pub fn current_loading(&self) -> bool {
        self.is_loading(&self.active_tab) || self.is_loading_report
    }

    /// Query id highlighted in the history list.
    pub fn selected_query_id(&self) -> Option<&str> {
        self.current_report().map(|r| r.meta.query_id.as_str())
    }

    /// No report is shown or on its way.
    pub fn is_report_area_idle(&self) -> bool {
        self.visible_tabs.is_empty() && self.selected_report.is_none() && !self.is_loading_report
    }

    // ── Request epochs ──────────────────────────────────────────────

    pub fn epoch(&self) -> u64 {
        self.request_epoch
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.request_epoch == epoch
    }

    /// Reset the report area for a new submission and return its epoch.
    ///
    /// Clears every report, marks each of `models` loading and activates
    /// the first of them.
    pub fn begin_submission(&mut self, models: &[String]) -> u64 {
        self.input_error = None;
        self.duplicate_notice = None;
        self.error_banner = None;
        self.is_analyzing = true;
        self.is_loading_report = false;

        self.report_by_model.clear();
        self.selected_report = None;
        self.loading_by_model.clear();
        for m in models {
            self.loading_by_model.set(m, true);
        }
        if let Some(first) = models.first() {
            self.active_tab = first.clone();
        }
        self.refresh_tabs();

        self.request_epoch += 1;
        self.request_epoch
    }

    /// Reset the report area for a history selection and return its epoch.
    pub fn begin_history_select(&mut self) -> u64 {
        self.request_epoch += 1;
        self.report_by_model.clear();
        self.loading_by_model.clear();
        self.selected_report = None;
        self.is_loading_report = true;
        self.refresh_tabs();
        self.request_epoch
    }

    // ── Derived state ───────────────────────────────────────────────

    fn refresh_tabs(&mut self) {
        let mut keys: Vec<&str> = Vec::new();
        for (k, loading) in self.loading_by_model.iter() {
            if *loading && !keys.contains(&k) {
                keys.push(k);
            }
        }
        for (k, _) in self.report_by_model.iter() {
            if !keys.contains(&k) {
                keys.push(k);
            }
        }

        let mut ordered: Vec<&str> = self
            .providers
            .iter()
            .map(|p| p.key.as_str())
            .filter(|k| keys.contains(k))
            .collect();
        for k in keys {
            if !ordered.contains(&k) {
                ordered.push(k);
            }
        }

        self.visible_tabs = ordered
            .into_iter()
            .map(|key| TabInfo {
                key: key.to_string(),
                label: self.display_names.label(key).to_string(),
                loading: self.is_loading(key),
                has_report: self.report_by_model.get(key).is_some(),
            })
            .collect();
        self.correct_active_tab();
    }

    fn correct_active_tab(&mut self) {
        let visible = self.is_loading(&self.active_tab)
            || self.report_by_model.get(&self.active_tab).is_some();
        if !visible {
            if let Some(first) = self.visible_tabs.first() {
                self.active_tab = first.key.clone();
            }
        }
    }

    // ── Tasks ───────────────────────────────────────────────────────

    /// Remove finished tasks whose display time has passed.
    pub fn prune_finished_tasks(&mut self, now: Instant) -> usize {
        self.tasks.prune(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsa_protocol::ReportMeta;

    fn providers() -> Vec<ProviderInfo> {
        vec![
            ProviderInfo::new("gemini", "Gemini"),
            ProviderInfo::new("openai", "DeepSeek"),
            ProviderInfo::new("qwen", "Qwen"),
        ]
    }

    fn report(query_id: &str, model: Option<&str>) -> AnalysisReport {
        AnalysisReport {
            meta: ReportMeta {
                query_id: query_id.into(),
                stock_code: "600519".into(),
                model_name: model.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn tab_keys(state: &DashboardState) -> Vec<&str> {
        state.visible_tabs().iter().map(|t| t.key.as_str()).collect()
    }

    #[test]
    fn first_provider_is_selected_on_load() {
        let mut state = DashboardState::default();
        state.set_providers(providers());
        assert_eq!(state.selected_models(), ["gemini".to_string()]);
        assert_eq!(state.active_tab(), "gemini");
    }

    #[test]
    fn last_selected_model_cannot_be_removed() {
        let mut state = DashboardState::default();
        state.set_providers(providers());
        assert!(!state.toggle_model("gemini"));
        assert_eq!(state.selected_models().len(), 1);

        assert!(state.toggle_model("qwen"));
        assert!(state.toggle_model("gemini"));
        assert_eq!(state.selected_models(), ["qwen".to_string()]);
    }

    #[test]
    fn unknown_providers_stay_out_of_the_selection() {
        let mut state = DashboardState::default();
        assert!(state.toggle_model("anything"));

        let mut state = DashboardState::default();
        state.set_providers(providers());
        assert!(!state.toggle_model("bogus"));
        assert_eq!(state.selected_models(), ["gemini".to_string()]);

        state.set_selected_models(vec!["bogus".into(), "qwen".into(), "qwen".into()]);
        assert_eq!(state.selected_models(), ["qwen".to_string()]);
        state.set_selected_models(vec!["bogus".into()]);
        assert_eq!(state.selected_models(), ["qwen".to_string()]);
    }

    #[test]
    fn visible_tabs_follow_provider_order_then_orphans() {
        let mut state = DashboardState::default();
        state.set_providers(providers());
        state.set_report("legacy-model", report("q-1", Some("legacy-model")));
        state.set_loading("qwen", true);
        state.set_loading("gemini", true);
        state.set_loading("openai", false);
        state.set_report("other", report("q-2", Some("other")));

        assert_eq!(tab_keys(&state), ["gemini", "qwen", "legacy-model", "other"]);
        assert_eq!(state.visible_tabs()[0].label, "Gemini");
        assert_eq!(state.visible_tabs()[2].label, "legacy-model");
    }

    #[test]
    fn hidden_active_tab_moves_to_first_visible() {
        let mut state = DashboardState::default();
        state.set_providers(providers());
        state.begin_submission(&["openai".to_string(), "qwen".to_string()]);
        assert_eq!(state.active_tab(), "openai");

        state.set_loading("openai", false);
        assert_eq!(state.active_tab(), "qwen");
        assert!(tab_keys(&state).contains(&state.active_tab()));
    }

    #[test]
    fn active_tab_kept_when_nothing_is_visible() {
        let mut state = DashboardState::default();
        state.set_providers(providers());
        state.select_tab("qwen");
        assert!(state.visible_tabs().is_empty());
        assert_eq!(state.active_tab(), "qwen");
    }

    #[test]
    fn submission_resets_views_and_bumps_epoch() {
        let mut state = DashboardState::default();
        state.set_providers(providers());
        state.set_report("gemini", report("q-1", Some("gemini")));
        state.duplicate_notice = Some("busy".into());

        let epoch = state.begin_submission(&["qwen".to_string()]);
        assert!(state.is_current(epoch));
        assert!(state.report_for("gemini").is_none());
        assert!(state.is_loading("qwen"));
        assert_eq!(state.duplicate_notice, None);
        assert_eq!(state.active_tab(), "qwen");
        assert!(state.current_loading());

        let next = state.begin_history_select();
        assert!(!state.is_current(epoch));
        assert!(state.is_current(next));
        assert!(!state.is_loading("qwen"));
    }

    #[test]
    fn legacy_report_activates_first_provider() {
        let mut state = DashboardState::default();
        state.set_providers(providers());
        state.select_tab("qwen");
        state.set_legacy_report(report("q-legacy", None));
        assert_eq!(state.active_tab(), "gemini");
        assert_eq!(state.selected_query_id(), Some("q-legacy"));
    }

    #[test]
    fn provider_report_wins_over_legacy_slot() {
        let mut state = DashboardState::default();
        state.set_providers(providers());
        state.set_legacy_report(report("q-legacy", None));
        state.set_report("gemini", report("q-new", Some("gemini")));
        assert_eq!(state.selected_query_id(), Some("q-new"));

        state.select_tab("gemini");
        assert!(state.selected_report().is_none());
    }

    #[test]
    fn event_log_is_capped() {
        let mut state = DashboardState::default();
        for i in 0..EVENT_LOG_CAPACITY + 10 {
            state.push_log(LogCategory::System, format!("entry {i}"));
        }
        assert_eq!(state.event_log.len(), EVENT_LOG_CAPACITY);
        assert_eq!(state.event_log[0].message, "entry 10");
    }
}
