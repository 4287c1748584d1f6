use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use dsa_client::{MockApi, StreamMessage};
use dsa_protocol::{
    AnalysisReport, DashboardError, HistoryItem, ProviderInfo, ReportMeta, TaskEvent, TaskInfo,
    TaskStatus, DEFAULT_FAILURE_MESSAGE,
};
use dsa_state::{
    DashboardState, Reconciler, ReportRouting, StreamStatus, TaskEventOutcome,
};

fn providers() -> Vec<ProviderInfo> {
    vec![
        ProviderInfo::new("openai", "DeepSeek"),
        ProviderInfo::new("gemini", "Gemini"),
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

fn history_items(count: usize) -> Vec<HistoryItem> {
    (0..count)
        .map(|i| HistoryItem {
            query_id: format!("q-{i}"),
            stock_code: "600519".into(),
            model_name: Some("gemini".into()),
            ..Default::default()
        })
        .collect()
}

fn models(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

async fn setup(api: MockApi) -> Reconciler<MockApi> {
    let reconciler = Reconciler::new(Arc::new(api), Arc::new(RwLock::new(DashboardState::default())));
    reconciler.load_providers().await.expect("providers");
    reconciler
}

async fn assert_active_tab_visible(reconciler: &Reconciler<MockApi>) {
    let state = reconciler.state().read().await;
    let tabs = state.visible_tabs();
    if !tabs.is_empty() {
        assert!(
            tabs.iter().any(|t| t.key == state.active_tab()),
            "active tab {} not in {:?}",
            state.active_tab(),
            tabs
        );
    }
}

fn task_id_for(outcomes: &[dsa_state::SubmissionOutcome], model: &str) -> String {
    outcomes
        .iter()
        .find(|o| o.model == model)
        .and_then(|o| o.result.as_ref().ok())
        .map(|a| a.task_id.clone())
        .expect("accepted submission")
}

#[tokio::test]
async fn test_fan_out_one_request_per_provider_with_isolated_failures() {
    let api = MockApi::new().with_providers(providers());
    api.fail_analyze("openai", DashboardError::Network("connection reset".into()));
    let reconciler = setup(api).await;
    reconciler.state().write().await.stock_input = "600519".into();

    let outcomes = reconciler
        .submit_analysis("600519", &models(&["openai", "gemini", "qwen"]))
        .await
        .expect("valid input");

    assert_eq!(outcomes.len(), 3);
    assert_eq!(reconciler.api().analyze_calls().len(), 3);
    assert!(outcomes[0].result.is_err());
    assert!(outcomes[1].result.is_ok());
    assert!(outcomes[2].result.is_ok());

    let state = reconciler.state().read().await;
    assert!(!state.is_loading("openai"));
    assert!(state.is_loading("gemini"));
    assert!(state.is_loading("qwen"));
    assert!(state.error_banner.as_deref().unwrap_or_default().starts_with("DeepSeek"));
    assert_eq!(state.stock_input, "");
    assert!(!state.is_analyzing);
    assert_eq!(state.tasks.len(), 2);
    drop(state);
    assert_active_tab_visible(&reconciler).await;
}

#[tokio::test]
async fn test_invalid_code_issues_no_requests() {
    let reconciler = setup(MockApi::new().with_providers(providers())).await;

    let err = reconciler
        .submit_analysis("12AB", &models(&["gemini"]))
        .await
        .expect_err("invalid");
    assert!(matches!(err, DashboardError::Validation(_)));
    assert!(reconciler.api().analyze_calls().is_empty());

    let state = reconciler.state().read().await;
    assert!(state.input_error.is_some());
    assert!(state.visible_tabs().is_empty());
}

#[tokio::test]
async fn test_empty_selection_is_rejected() {
    let reconciler = setup(MockApi::new().with_providers(providers())).await;
    let err = reconciler.submit_analysis("600519", &[]).await.expect_err("no model");
    assert!(matches!(err, DashboardError::Validation(_)));
    assert!(reconciler.api().analyze_calls().is_empty());
}

#[tokio::test]
async fn test_duplicate_submission_names_stock_and_provider() {
    let api = MockApi::new().with_providers(providers());
    api.fail_analyze(
        "gemini",
        DashboardError::DuplicateTask {
            stock_code: "600519".into(),
            existing_task_id: Some("t-old".into()),
        },
    );
    let reconciler = setup(api).await;

    reconciler
        .submit_analysis(" 600519 ", &models(&["gemini", "qwen"]))
        .await
        .expect("valid input");

    let state = reconciler.state().read().await;
    let notice = state.duplicate_notice.clone().expect("duplicate notice");
    assert!(notice.contains("600519"));
    assert!(notice.contains("Gemini"));
    assert!(state.error_banner.is_none());
    assert!(state.is_loading("qwen"));
}

#[tokio::test]
async fn test_completion_updates_only_its_provider() {
    let reconciler = setup(MockApi::new().with_providers(providers())).await;
    let outcomes = reconciler
        .submit_analysis("600519", &models(&["openai", "gemini"]))
        .await
        .expect("valid input");
    assert_eq!(reconciler.api().analyze_calls().len(), 2);

    let gemini_task = task_id_for(&outcomes, "gemini");
    reconciler
        .api()
        .insert_report(&gemini_task, report(&gemini_task, Some("gemini")));

    let outcome = reconciler
        .on_task_event(TaskEvent::completed(
            TaskInfo::new(gemini_task.as_str(), "600519")
                .with_model("gemini")
                .with_status(TaskStatus::Completed),
        ))
        .await;
    assert_eq!(outcome, TaskEventOutcome::ReportLoaded("gemini".into()));

    let state = reconciler.state().read().await;
    assert!(state.report_for("gemini").is_some());
    assert!(!state.is_loading("gemini"));
    assert!(state.report_for("openai").is_none());
    assert!(state.is_loading("openai"));
    assert_eq!(state.active_tab(), "openai");
    assert_eq!(reconciler.api().history_calls().len(), 1);
}

#[tokio::test]
async fn test_later_history_click_wins() {
    let api = MockApi::new().with_providers(providers());
    api.insert_report("q-1", report("q-1", Some("openai")));
    api.insert_report("q-2", report("q-2", Some("gemini")));
    api.delay_report("q-1", Duration::from_millis(200));
    let reconciler = setup(api).await;

    let (first, second) = tokio::join!(reconciler.on_history_select("q-1"), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        reconciler.on_history_select("q-2").await
    });

    assert_eq!(first.expect("q-1"), ReportRouting::Superseded);
    assert_eq!(second.expect("q-2"), ReportRouting::Provider("gemini".into()));

    let state = reconciler.state().read().await;
    assert!(state.report_for("openai").is_none());
    assert_eq!(state.active_tab(), "gemini");
    assert_eq!(state.selected_query_id(), Some("q-2"));
    assert!(!state.is_loading_report);
}

#[tokio::test]
async fn test_submission_supersedes_pending_history_fetch() {
    let api = MockApi::new().with_providers(providers());
    api.insert_report("q-1", report("q-1", Some("openai")));
    api.delay_report("q-1", Duration::from_millis(200));
    let reconciler = setup(api).await;

    let (selected, submitted) = tokio::join!(reconciler.on_history_select("q-1"), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        reconciler.submit_analysis("AAPL", &models(&["qwen"])).await
    });

    assert_eq!(selected.expect("q-1"), ReportRouting::Superseded);
    assert_eq!(submitted.expect("valid").len(), 1);

    let state = reconciler.state().read().await;
    assert!(state.report_for("openai").is_none());
    assert!(state.is_loading("qwen"));
    assert_eq!(state.active_tab(), "qwen");
    assert!(!state.is_loading_report);
}

#[tokio::test]
async fn test_history_routing_by_provider_and_legacy() {
    let api = MockApi::new().with_providers(providers());
    api.insert_report("q-gemini", report("q-gemini", Some("gemini")));
    api.insert_report("q-legacy", report("q-legacy", None));
    let reconciler = setup(api).await;

    let routed = reconciler.on_history_select("q-gemini").await.expect("report");
    assert_eq!(routed, ReportRouting::Provider("gemini".into()));
    {
        let state = reconciler.state().read().await;
        assert_eq!(state.active_tab(), "gemini");
        assert!(state.report_for("gemini").is_some());
        assert!(state.selected_report().is_none());
    }

    let routed = reconciler.on_history_select("q-legacy").await.expect("report");
    assert_eq!(routed, ReportRouting::Legacy);
    let state = reconciler.state().read().await;
    assert!(state.report_for("gemini").is_none());
    assert_eq!(state.selected_report().map(|r| r.meta.query_id.as_str()), Some("q-legacy"));
    assert_eq!(state.active_tab(), "openai");
    assert_eq!(state.current_report().map(|r| r.meta.query_id.as_str()), Some("q-legacy"));
}

#[tokio::test]
async fn test_missing_report_clears_spinner() {
    let reconciler = setup(MockApi::new().with_providers(providers())).await;
    let err = reconciler.on_history_select("nope").await.expect_err("missing");
    assert!(matches!(err, DashboardError::Http { status: 404, .. }));
    assert!(!reconciler.state().read().await.is_loading_report);
}

#[tokio::test]
async fn test_toggling_last_model_is_noop() {
    let reconciler = setup(MockApi::new().with_providers(providers())).await;
    assert!(!reconciler.toggle_model("openai").await);
    assert_eq!(reconciler.state().read().await.selected_models(), ["openai".to_string()]);

    assert!(reconciler.toggle_model("qwen").await);
    assert!(reconciler.toggle_model("openai").await);
    assert!(!reconciler.toggle_model("qwen").await);
    assert_eq!(reconciler.state().read().await.selected_models(), ["qwen".to_string()]);
}

#[tokio::test]
async fn test_unknown_provider_cannot_be_selected() {
    let reconciler = setup(MockApi::new().with_providers(providers())).await;
    assert!(!reconciler.toggle_model("bogus").await);
    assert_eq!(reconciler.state().read().await.selected_models(), ["openai".to_string()]);

    assert!(reconciler.toggle_model("gemini").await);
    assert_eq!(
        reconciler.state().read().await.selected_models(),
        ["openai".to_string(), "gemini".to_string()]
    );
}

#[tokio::test]
async fn test_task_events_are_idempotent() {
    let reconciler = setup(MockApi::new().with_providers(providers())).await;
    let task = TaskInfo::new("t-1", "00700").with_model("qwen");

    assert_eq!(
        reconciler.on_task_event(TaskEvent::created(task.clone())).await,
        TaskEventOutcome::Applied
    );
    assert_eq!(
        reconciler.on_task_event(TaskEvent::created(task.clone())).await,
        TaskEventOutcome::Ignored
    );
    assert_eq!(
        reconciler
            .on_task_event(TaskEvent::started(task.clone().with_status(TaskStatus::Processing)))
            .await,
        TaskEventOutcome::Applied
    );
    assert_eq!(
        reconciler
            .on_task_event(TaskEvent::started(TaskInfo::new("ghost", "AAPL")))
            .await,
        TaskEventOutcome::Ignored
    );
    assert_eq!(
        reconciler
            .on_task_event(TaskEvent::completed(TaskInfo::new("ghost", "AAPL")))
            .await,
        TaskEventOutcome::Ignored
    );

    let first = reconciler.on_task_event(TaskEvent::failed(task.clone())).await;
    assert_eq!(first, TaskEventOutcome::Applied);
    let again = reconciler.on_task_event(TaskEvent::completed(task.clone())).await;
    assert_eq!(again, TaskEventOutcome::Ignored);

    let state = reconciler.state().read().await;
    assert_eq!(state.tasks.len(), 1);
    assert_eq!(state.tasks.get("t-1").map(|t| t.info.status), Some(TaskStatus::Failed));
    assert!(reconciler.api().history_calls().is_empty());
}

#[tokio::test]
async fn test_failed_task_clears_loading_and_reports_error() {
    let reconciler = setup(MockApi::new().with_providers(providers())).await;
    let outcomes = reconciler
        .submit_analysis("600519", &models(&["openai", "gemini"]))
        .await
        .expect("valid input");
    let openai_task = task_id_for(&outcomes, "openai");

    let outcome = reconciler
        .on_task_event(TaskEvent::failed(
            TaskInfo::new(openai_task.as_str(), "600519").with_status(TaskStatus::Failed),
        ))
        .await;
    assert_eq!(outcome, TaskEventOutcome::Applied);

    let state = reconciler.state().read().await;
    assert!(!state.is_loading("openai"));
    assert!(state.is_loading("gemini"));
    assert_eq!(state.error_banner.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
    assert_eq!(state.active_tab(), "gemini");
}

#[tokio::test]
async fn test_completion_of_superseded_submission_is_not_shown() {
    let api = MockApi::new().with_providers(providers());
    api.insert_report("q-legacy", report("q-legacy", None));
    let reconciler = setup(api).await;

    let outcomes = reconciler
        .submit_analysis("600519", &models(&["gemini"]))
        .await
        .expect("valid input");
    let task_id = task_id_for(&outcomes, "gemini");
    reconciler.api().insert_report(&task_id, report(&task_id, Some("gemini")));

    reconciler.on_history_select("q-legacy").await.expect("legacy report");

    let outcome = reconciler
        .on_task_event(TaskEvent::completed(TaskInfo::new(task_id.as_str(), "600519").with_model("gemini")))
        .await;
    assert_eq!(outcome, TaskEventOutcome::ReportSuperseded);
    assert!(!reconciler.api().report_calls().contains(&task_id));
    assert_eq!(reconciler.api().history_calls().len(), 1);

    let state = reconciler.state().read().await;
    assert!(state.report_for("gemini").is_none());
    assert_eq!(state.selected_query_id(), Some("q-legacy"));
}

#[tokio::test]
async fn test_history_pagination() {
    let reconciler = setup(MockApi::new().with_providers(providers()).with_history(history_items(45))).await;

    assert!(!reconciler.load_more_history().await.expect("nothing loaded yet"));

    reconciler.refresh_history(false).await.expect("page 1");
    {
        let state = reconciler.state().read().await;
        assert_eq!(state.history.items.len(), 20);
        assert!(state.history.has_more);
        assert_eq!(state.history.total, 45);
    }

    assert!(reconciler.load_more_history().await.expect("page 2"));
    assert!(reconciler.load_more_history().await.expect("page 3"));
    {
        let state = reconciler.state().read().await;
        assert_eq!(state.history.items.len(), 45);
        assert_eq!(state.history.page, 3);
        assert!(!state.history.has_more);
        assert!(state.history.all_loaded());
    }
    assert!(!reconciler.load_more_history().await.expect("exhausted"));

    let pages: Vec<u32> = reconciler.api().history_calls().iter().map(|q| q.page).collect();
    assert_eq!(pages, [1, 2, 3]);
    assert!(reconciler.api().history_calls().iter().all(|q| q.limit == 20));

    reconciler.refresh_history(false).await.expect("reset");
    let state = reconciler.state().read().await;
    assert_eq!(state.history.items.len(), 20);
    assert_eq!(state.history.page, 1);
}

#[tokio::test]
async fn test_page_requested_before_refresh_is_dropped() {
    let api = MockApi::new().with_providers(providers()).with_history(history_items(45));
    api.delay_history_page(2, Duration::from_millis(200));
    let reconciler = setup(api).await;
    reconciler.refresh_history(false).await.expect("page 1");

    let pending = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.load_more_history().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    reconciler.api().prepend_history(HistoryItem {
        query_id: "q-new".into(),
        stock_code: "AAPL".into(),
        ..Default::default()
    });
    reconciler.refresh_history(false).await.expect("refresh");

    assert!(!pending.await.expect("join").expect("stale page"));
    {
        let state = reconciler.state().read().await;
        assert_eq!(state.history.page, 1);
        assert_eq!(state.history.items.len(), 20);
        assert_eq!(state.history.items[0].query_id, "q-new");
        assert_eq!(state.history.total, 46);
        assert!(state.history.can_load_more());
    }

    assert!(reconciler.load_more_history().await.expect("page 2"));
    let state = reconciler.state().read().await;
    let ids: Vec<&str> = state.history.items.iter().map(|i| i.query_id.as_str()).collect();
    assert_eq!(ids.len(), 40);
    assert_eq!(ids[19], "q-18");
    assert_eq!(ids[20], "q-19");
    assert_eq!(ids[39], "q-38");
}

#[tokio::test]
async fn test_history_failure_keeps_previous_rows() {
    let reconciler = setup(MockApi::new().with_providers(providers()).with_history(history_items(3))).await;
    reconciler.refresh_history(false).await.expect("page 1");

    reconciler
        .api()
        .fail_history(Some(DashboardError::Http { status: 500, message: "boom".into() }));
    assert!(reconciler.refresh_history(false).await.is_err());

    let state = reconciler.state().read().await;
    assert_eq!(state.history.items.len(), 3);
    assert!(!state.history.is_loading);
}

#[tokio::test]
async fn test_auto_select_first_history_record() {
    let api = MockApi::new().with_providers(providers()).with_history(history_items(2));
    api.insert_report("q-0", report("q-0", Some("gemini")));
    let reconciler = setup(api).await;

    reconciler.refresh_history(true).await.expect("history");
    let state = reconciler.state().read().await;
    assert_eq!(state.active_tab(), "gemini");
    assert_eq!(state.selected_query_id(), Some("q-0"));
}

#[tokio::test]
async fn test_auto_select_skipped_while_analysis_runs() {
    let api = MockApi::new().with_providers(providers()).with_history(history_items(2));
    api.insert_report("q-0", report("q-0", Some("gemini")));
    let reconciler = setup(api).await;

    reconciler
        .submit_analysis("600519", &models(&["qwen"]))
        .await
        .expect("valid input");
    reconciler.refresh_history(true).await.expect("history");

    assert!(reconciler.api().report_calls().is_empty());
    let state = reconciler.state().read().await;
    assert!(state.is_loading("qwen"));
    assert_eq!(state.active_tab(), "qwen");
}

#[tokio::test]
async fn test_finished_tasks_are_pruned_after_linger() {
    let reconciler = setup(MockApi::new().with_providers(providers())).await;
    for id in ["ok", "bad"] {
        reconciler
            .on_task_event(TaskEvent::created(TaskInfo::new(id, "AAPL")))
            .await;
    }
    reconciler.on_task_event(TaskEvent::completed(TaskInfo::new("ok", "AAPL"))).await;
    reconciler.on_task_event(TaskEvent::failed(TaskInfo::new("bad", "AAPL"))).await;

    let now = Instant::now();
    assert_eq!(reconciler.prune_finished_tasks(now).await, 0);
    assert_eq!(reconciler.prune_finished_tasks(now + Duration::from_secs(3)).await, 1);
    assert_eq!(reconciler.prune_finished_tasks(now + Duration::from_secs(6)).await, 1);
    assert!(reconciler.state().read().await.tasks.is_empty());
}

#[tokio::test]
async fn test_stream_status_transitions() {
    let reconciler = setup(MockApi::new().with_providers(providers()).with_history(history_items(1))).await;

    assert!(reconciler.on_stream_message(StreamMessage::Connected).await.is_none());
    assert_eq!(reconciler.state().read().await.stream_status, StreamStatus::Connected);
    assert!(reconciler.api().history_calls().is_empty());

    reconciler
        .on_stream_message(StreamMessage::Disconnected { reason: "eof".into(), attempt: 1 })
        .await;
    assert_eq!(
        reconciler.state().read().await.stream_status,
        StreamStatus::Reconnecting { attempt: 1 }
    );

    reconciler.on_stream_message(StreamMessage::Connected).await;
    assert_eq!(reconciler.api().history_calls().len(), 1);

    reconciler.on_stream_message(StreamMessage::GaveUp { attempts: 4 }).await;
    assert_eq!(reconciler.state().read().await.stream_status, StreamStatus::Offline);

    let task = TaskEvent::created(TaskInfo::new("t-9", "AAPL"));
    assert_eq!(
        reconciler.on_stream_message(StreamMessage::Task(task)).await,
        Some(TaskEventOutcome::Applied)
    );
}

#[tokio::test]
async fn test_active_tab_stays_visible_across_updates() {
    let api = MockApi::new().with_providers(providers());
    api.fail_analyze("openai", DashboardError::Network("down".into()));
    let reconciler = setup(api).await;

    let outcomes = reconciler
        .submit_analysis("600519", &models(&["openai", "gemini", "qwen"]))
        .await
        .expect("valid input");
    assert_active_tab_visible(&reconciler).await;
    assert_eq!(reconciler.state().read().await.active_tab(), "gemini");

    let qwen_task = task_id_for(&outcomes, "qwen");
    reconciler
        .on_task_event(TaskEvent::failed(TaskInfo::new(qwen_task.as_str(), "600519")))
        .await;
    assert_active_tab_visible(&reconciler).await;

    reconciler.select_tab("qwen").await;
    assert_active_tab_visible(&reconciler).await;
    assert_eq!(reconciler.state().read().await.active_tab(), "gemini");
}

#[tokio::test]
async fn test_run_stream_applies_messages_in_order() {
    let reconciler = setup(MockApi::new().with_providers(providers())).await;
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let worker = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.run_stream(rx).await })
    };

    let task = TaskInfo::new("t-1", "AAPL").with_model("gemini");
    tx.send(StreamMessage::Connected).await.expect("send");
    tx.send(StreamMessage::Task(TaskEvent::created(task.clone()))).await.expect("send");
    tx.send(StreamMessage::Task(TaskEvent::failed(task))).await.expect("send");
    drop(tx);
    worker.await.expect("stream worker");

    let state = reconciler.state().read().await;
    assert_eq!(state.stream_status, StreamStatus::Connected);
    assert_eq!(state.tasks.get("t-1").map(|t| t.info.status), Some(TaskStatus::Failed));
    assert_eq!(state.error_banner.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
}

#[tokio::test]
async fn test_run_stream_does_not_wait_for_report_fetch() {
    let reconciler = setup(MockApi::new().with_providers(providers())).await;
    let outcomes = reconciler
        .submit_analysis("600519", &models(&["openai", "gemini"]))
        .await
        .expect("valid input");
    let openai_task = task_id_for(&outcomes, "openai");
    let gemini_task = task_id_for(&outcomes, "gemini");
    reconciler
        .api()
        .insert_report(&gemini_task, report(&gemini_task, Some("gemini")));
    reconciler.api().delay_report(&gemini_task, Duration::from_millis(500));

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let worker = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.run_stream(rx).await })
    };

    let gemini = TaskInfo::new(gemini_task.as_str(), "600519").with_model("gemini");
    let openai = TaskInfo::new(openai_task.as_str(), "600519").with_model("openai");
    for event in [
        TaskEvent::created(gemini.clone()),
        TaskEvent::created(openai.clone()),
        TaskEvent::completed(gemini),
        TaskEvent::failed(TaskInfo {
            error: Some("quota exceeded".into()),
            ..openai
        }),
    ] {
        tx.send(StreamMessage::Task(event)).await.expect("send");
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    {
        let state = reconciler.state().read().await;
        let status = |id: &str| state.tasks.get(id).map(|t| t.info.status);
        assert_eq!(status(&openai_task), Some(TaskStatus::Failed));
        assert_eq!(status(&gemini_task), Some(TaskStatus::Completed));
        assert!(!state.is_loading("openai"));
        assert_eq!(state.error_banner.as_deref(), Some("quota exceeded"));
        assert!(state.report_for("gemini").is_none());
        assert!(state.is_loading("gemini"));
    }

    drop(tx);
    worker.await.expect("stream worker");
    let state = reconciler.state().read().await;
    assert!(state.report_for("gemini").is_some());
    assert!(!state.is_loading("gemini"));
}
