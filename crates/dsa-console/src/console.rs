//! Interactive terminal dashboard.
//!
//! Type a stock code and press Enter to analyze it with every selected
//! model. The left column lists recent reports, the right column shows the
//! running tasks, one tab per model and the active tab's report. Slash
//! commands cover the remaining actions (`/help` lists them).
//!
//! Launch with `dsa-console` (or `dsa-console console`).

use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use dsa_client::{AnalysisApi, StreamMessage};
use dsa_protocol::{
    format_timestamp, AnalysisReport, DashboardError, DisplayNames, PriceDirection, TaskStatus,
};
use dsa_state::{
    DashboardState, LogCategory, LogEntry, Reconciler, ReportRouting, StreamStatus,
    SubmissionOutcome, TabInfo,
};

use crate::views;

const CONSOLE_CAPACITY: usize = 500;

/// A provider in the model selector.
#[derive(Debug, Clone)]
struct ProviderPill {
    key: String,
    label: String,
    badge: String,
    color: Color,
    selected: bool,
}

#[derive(Debug, Clone)]
struct TaskView {
    stock: String,
    model: String,
    status: TaskStatus,
    detail: String,
}

#[derive(Debug, Clone)]
struct HistoryRow {
    query_id: String,
    title: String,
    stock_code: String,
    badge: Option<(String, Color)>,
    created_at: String,
    sentiment_score: Option<i32>,
}

/// Snapshot of dashboard state for rendering.
struct ConsoleSnapshot {
    providers: Vec<ProviderPill>,
    stream_status: StreamStatus,
    input_error: Option<String>,
    duplicate_notice: Option<String>,
    error_banner: Option<String>,
    is_analyzing: bool,
    tabs: Vec<TabInfo>,
    active_tab: String,
    active_label: String,
    report: Option<AnalysisReport>,
    report_loading: bool,
    tasks: Vec<TaskView>,
    history: Vec<HistoryRow>,
    history_total: u64,
    history_loading: bool,
    history_loading_more: bool,
    history_all_loaded: bool,
    selected_query_id: Option<String>,
    event_log: Vec<LogEntry>,
    names: DisplayNames,
}

fn build_snapshot(state: &DashboardState) -> ConsoleSnapshot {
    let names = state.display_names().clone();
    let selected = state.selected_models();

    let providers = state
        .providers()
        .iter()
        .map(|p| {
            let (badge, color) = views::provider_badge(&p.key, &names);
            ProviderPill {
                key: p.key.clone(),
                label: names.label(&p.key).to_string(),
                badge,
                color,
                selected: selected.contains(&p.key),
            }
        })
        .collect();

    let tasks = state
        .tasks
        .tasks()
        .iter()
        .map(|t| {
            let info = &t.info;
            let detail = match (info.status, &info.error, &info.message) {
                (TaskStatus::Failed, Some(err), _) if !err.is_empty() => err.clone(),
                (_, _, Some(msg)) if !msg.is_empty() => msg.clone(),
                _ => info.progress.map(|p| format!("{p}%")).unwrap_or_default(),
            };
            TaskView {
                stock: info
                    .stock_name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| info.stock_code.clone()),
                model: info
                    .provider_key()
                    .map(|k| names.label(k).to_string())
                    .unwrap_or_else(|| "-".to_string()),
                status: info.status,
                detail,
            }
        })
        .collect();

    let history = state
        .history
        .items
        .iter()
        .map(|item| HistoryRow {
            query_id: item.query_id.clone(),
            title: item.title().to_string(),
            stock_code: item.stock_code.clone(),
            badge: item
                .model_name
                .as_deref()
                .filter(|m| !m.is_empty())
                .map(|m| views::provider_badge(m, &names)),
            created_at: format_timestamp(&item.created_at),
            sentiment_score: item.sentiment_score,
        })
        .collect();

    ConsoleSnapshot {
        providers,
        stream_status: state.stream_status,
        input_error: state.input_error.clone(),
        duplicate_notice: state.duplicate_notice.clone(),
        error_banner: state.error_banner.clone(),
        is_analyzing: state.is_analyzing,
        tabs: state.visible_tabs().to_vec(),
        active_tab: state.active_tab().to_string(),
        active_label: state.label(state.active_tab()),
        report: state.current_report().cloned(),
        report_loading: state.current_loading(),
        tasks,
        history,
        history_total: state.history.total,
        history_loading: state.history.is_loading,
        history_loading_more: state.history.is_loading_more,
        history_all_loaded: state.history.all_loaded(),
        selected_query_id: state.selected_query_id().map(str::to_string),
        event_log: state.event_log.clone(),
        names,
    }
}

/// Results of background operations, reported back to the console.
#[derive(Debug)]
enum ConsoleEvent {
    Submitted {
        input: String,
        result: Result<Vec<SubmissionOutcome>, DashboardError>,
    },
    Opened {
        query_id: String,
        result: Result<ReportRouting, DashboardError>,
    },
    MoreLoaded(Result<bool, DashboardError>),
}

/// What the event loop should do after a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    None,
    Quit,
    Submit,
    NextTab,
    PrevTab,
    OpenHistory,
    LoadMore,
}

/// The dashboard console TUI state.
struct DashboardConsole<A: ?Sized> {
    reconciler: Reconciler<A>,
    /// Current text in the input field.
    input: String,
    /// Cursor position within the input field, in characters.
    cursor_pos: usize,
    /// Command history for up/down arrow navigation.
    history: Vec<String>,
    history_pos: Option<usize>,
    /// Highlighted row of the history list.
    history_cursor: usize,
    /// Frame counter driving the spinners.
    tick: u64,
    console_messages: Vec<(chrono::DateTime<chrono::Utc>, String, Color)>,
    events_tx: mpsc::UnboundedSender<ConsoleEvent>,
    events_rx: mpsc::UnboundedReceiver<ConsoleEvent>,
}

impl<A: AnalysisApi + ?Sized + 'static> DashboardConsole<A> {
    fn new(reconciler: Reconciler<A>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut console = Self {
            reconciler,
            input: String::new(),
            cursor_pos: 0,
            history: Vec::new(),
            history_pos: None,
            history_cursor: 0,
            tick: 0,
            console_messages: Vec::new(),
            events_tx,
            events_rx,
        };
        console.add_message(
            "Stock analysis dashboard ready. Type a stock code and press Enter to analyze it.",
            Color::Cyan,
        );
        console.add_message(
            "Commands: /help, /models, /toggle, /tab, /open, /more, /refresh, /quit",
            Color::DarkGray,
        );
        console
    }

    async fn snapshot(&self) -> ConsoleSnapshot {
        build_snapshot(&*self.reconciler.state().read().await)
    }

    async fn process_input(&mut self) {
        let input = self.input.trim().to_string();
        if input.is_empty() {
            return;
        }

        self.history.push(input.clone());
        self.history_pos = None;

        if input.starts_with('/') {
            self.process_command(&input).await;
            self.set_input(String::new());
        } else {
            // The input stays until the backend accepts the submission.
            self.submit(input).await;
        }
    }

    async fn process_command(&mut self, cmd: &str) {
        let mut parts = cmd.splitn(2, ' ');
        let command = parts.next().unwrap_or_default();
        let args = parts.next().unwrap_or("").trim();

        match command {
            "/help" => {
                self.add_message("Available commands:", Color::Cyan);
                for line in [
                    "  <code>           Analyze a stock with the selected models (600519, HK00700, AAPL)",
                    "  /models          List providers and the current selection",
                    "  /toggle <model>  Add or remove a model (key or number from /models)",
                    "  /tab <model>     Show a model's report",
                    "  /open <n|id>     Open a history record (row number or query id)",
                    "  /more            Load the next page of history",
                    "  /refresh         Reload the first page of history",
                    "  /tasks           List running tasks",
                    "  /quit            Exit the dashboard",
                    "  Tab/Shift+Tab switch model tabs, PgUp/PgDn move in history, Ctrl+O opens it",
                ] {
                    self.add_message(line, Color::White);
                }
            }
            "/models" => {
                let snap = self.snapshot().await;
                if snap.providers.is_empty() {
                    self.add_message("No providers loaded.", Color::Yellow);
                    return;
                }
                self.add_message("Providers:", Color::Cyan);
                for (i, p) in snap.providers.iter().enumerate() {
                    let mark = if p.selected { "[x]" } else { "[ ]" };
                    self.add_message(
                        &format!("  {} {mark} {} ({})", i + 1, p.label, p.key),
                        if p.selected { Color::Green } else { Color::White },
                    );
                }
            }
            "/toggle" => {
                let Some(key) = self.resolve_provider(args, false).await else {
                    self.unresolved_model("/toggle", args);
                    return;
                };
                if self.reconciler.toggle_model(&key).await {
                    self.add_message(&format!("Selection changed: {key}"), Color::Green);
                } else {
                    self.add_message("At least one model must stay selected.", Color::Yellow);
                }
            }
            "/tab" => {
                let Some(key) = self.resolve_provider(args, true).await else {
                    self.unresolved_model("/tab", args);
                    return;
                };
                self.reconciler.select_tab(&key).await;
            }
            "/open" => {
                let query_id = {
                    let state = self.reconciler.state().read().await;
                    match args.parse::<usize>() {
                        Ok(n) if n >= 1 => state.history.items.get(n - 1).map(|i| i.query_id.clone()),
                        _ if !args.is_empty() => Some(args.to_string()),
                        _ => None,
                    }
                };
                match query_id {
                    Some(query_id) => self.open_history(query_id),
                    None => self.add_message("Usage: /open <row number or query id>", Color::Yellow),
                }
            }
            "/more" => self.load_more(),
            "/refresh" => {
                let reconciler = self.reconciler.clone();
                tokio::spawn(async move {
                    let _ = reconciler.refresh_history(false).await;
                });
            }
            "/tasks" => {
                let snap = self.snapshot().await;
                if snap.tasks.is_empty() {
                    self.add_message("No running tasks.", Color::Yellow);
                    return;
                }
                self.add_message(&format!("Tasks ({}):", snap.tasks.len()), Color::Cyan);
                for t in &snap.tasks {
                    self.add_message(
                        &format!("  {} on {}: {}", t.stock, t.model, views::format_task_status(t.status)),
                        views::task_status_color(t.status),
                    );
                }
            }
            "/quit" | "/exit" | "/q" => {
                // Handled by the event loop.
            }
            _ => {
                self.add_message(
                    &format!("Unknown command: {command}. Type /help for available commands."),
                    Color::Red,
                );
            }
        }
    }

    /// Map a provider key or 1-based `/models` index to a key. With
    /// `include_tabs`, keys of open result tabs resolve too.
    async fn resolve_provider(&self, arg: &str, include_tabs: bool) -> Option<String> {
        if arg.is_empty() {
            return None;
        }
        let state = self.reconciler.state().read().await;
        if let Ok(n) = arg.parse::<usize>() {
            return n
                .checked_sub(1)
                .and_then(|i| state.providers().get(i))
                .map(|p| p.key.clone());
        }
        let known = state.providers().iter().any(|p| p.key == arg)
            || (include_tabs && state.visible_tabs().iter().any(|t| t.key == arg));
        known.then(|| arg.to_string())
    }

    fn unresolved_model(&mut self, command: &str, arg: &str) {
        if arg.is_empty() {
            self.add_message(&format!("Usage: {command} <model key or number>"), Color::Yellow);
        } else {
            self.add_message(&format!("Unknown model: {arg} (see /models)"), Color::Red);
        }
    }

    async fn submit(&mut self, input: String) {
        let models = {
            let mut state = self.reconciler.state().write().await;
            state.stock_input = input.clone();
            state.selected_models().to_vec()
        };
        let reconciler = self.reconciler.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = reconciler.submit_analysis(&input, &models).await;
            let _ = tx.send(ConsoleEvent::Submitted { input, result });
        });
    }

    fn open_history(&mut self, query_id: String) {
        let reconciler = self.reconciler.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = reconciler.on_history_select(&query_id).await;
            let _ = tx.send(ConsoleEvent::Opened { query_id, result });
        });
    }

    fn load_more(&mut self) {
        let reconciler = self.reconciler.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(ConsoleEvent::MoreLoaded(reconciler.load_more_history().await));
        });
    }

    async fn cycle_tab(&mut self, forward: bool) {
        let next = {
            let state = self.reconciler.state().read().await;
            let tabs = state.visible_tabs();
            if tabs.is_empty() {
                return;
            }
            let current = tabs
                .iter()
                .position(|t| t.key == state.active_tab())
                .unwrap_or(0);
            let idx = if forward {
                (current + 1) % tabs.len()
            } else {
                (current + tabs.len() - 1) % tabs.len()
            };
            tabs[idx].key.clone()
        };
        self.reconciler.select_tab(&next).await;
    }

    async fn open_highlighted(&mut self) {
        let query_id = self
            .reconciler
            .state()
            .read()
            .await
            .history
            .items
            .get(self.history_cursor)
            .map(|i| i.query_id.clone());
        if let Some(query_id) = query_id {
            self.open_history(query_id);
        }
    }

    /// Apply results of finished background operations.
    async fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                ConsoleEvent::Submitted { input, result } => match result {
                    Ok(outcomes) => {
                        let accepted = outcomes.iter().filter(|o| o.result.is_ok()).count();
                        if accepted > 0 {
                            self.add_message(
                                &format!("Submitted {input} to {accepted} of {} model(s)", outcomes.len()),
                                Color::Green,
                            );
                        }
                        let cleared = self.reconciler.state().read().await.stock_input.is_empty();
                        if cleared && self.input.trim() == input {
                            self.set_input(String::new());
                        }
                    }
                    Err(e) => self.add_message(&e.to_string(), Color::Red),
                },
                ConsoleEvent::Opened { query_id, result } => {
                    if let Ok(ReportRouting::Legacy) = result {
                        self.add_message(
                            &format!("Report {query_id} predates model tagging"),
                            Color::DarkGray,
                        );
                    }
                }
                ConsoleEvent::MoreLoaded(Ok(false)) => {
                    let all_loaded = self.reconciler.state().read().await.history.all_loaded();
                    if all_loaded {
                        self.add_message("All history records are loaded.", Color::DarkGray);
                    }
                }
                ConsoleEvent::MoreLoaded(_) => {}
            }
        }
    }

    fn set_input(&mut self, input: String) {
        self.cursor_pos = input.chars().count();
        self.input = input;
    }

    fn byte_index(&self, char_pos: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }

    fn add_message(&mut self, msg: &str, color: Color) {
        self.console_messages
            .push((chrono::Utc::now(), msg.to_string(), color));
        if self.console_messages.len() > CONSOLE_CAPACITY {
            self.console_messages.remove(0);
        }
    }

    // ── Rendering ───────────────────────────────────────────────────

    fn render(&self, frame: &mut Frame, snapshot: &ConsoleSnapshot) {
        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4), // Header
                Constraint::Min(10),   // History + report
                Constraint::Length(8), // Console output
                Constraint::Length(5), // Input
            ])
            .split(frame.area());

        self.render_header(frame, outer[0], snapshot);
        self.render_main_area(frame, outer[1], snapshot);
        self.render_console_output(frame, outer[2], snapshot);
        self.render_input(frame, outer[3], snapshot);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(" Stock Analysis Dashboard ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan));

        let (stream_label, stream_color) = views::stream_status_label(snap.stream_status);
        let selected = snap.providers.iter().filter(|p| p.selected).count();
        let mut status = vec![
            Span::styled("  Stream: ", Style::default().fg(Color::Gray)),
            Span::styled(stream_label, Style::default().fg(stream_color)),
            Span::styled("  |  Models: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{selected}/{}", snap.providers.len()),
                Style::default().fg(Color::Magenta),
            ),
            Span::styled("  |  Tasks: ", Style::default().fg(Color::Gray)),
            Span::styled(snap.tasks.len().to_string(), Style::default().fg(Color::Yellow)),
        ];
        if snap.is_analyzing {
            status.push(Span::styled(
                format!("  |  {} Submitting", views::spinner_frame(self.tick)),
                Style::default().fg(Color::Yellow),
            ));
        }

        let mut pills = vec![Span::raw("  ")];
        for (i, p) in snap.providers.iter().enumerate() {
            let style = if p.selected {
                Style::default().fg(p.color).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            let mark = if p.selected { "x" } else { " " };
            pills.push(Span::styled(
                format!("{} [{mark}] {} {}   ", i + 1, p.badge, p.label),
                style,
            ));
        }
        if snap.providers.is_empty() {
            pills.push(Span::styled("Loading providers...", Style::default().fg(Color::DarkGray)));
        }

        let paragraph = Paragraph::new(vec![Line::from(status), Line::from(pills)]).block(block);
        frame.render_widget(paragraph, area);
    }

    fn render_main_area(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(34), // History
                Constraint::Percentage(66), // Tasks + tabs + report
            ])
            .split(area);

        self.render_history(frame, columns[0], snap);

        let task_height = if snap.tasks.is_empty() {
            0
        } else {
            (snap.tasks.len() as u16 + 3).min(7)
        };
        let right_column = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(task_height),
                Constraint::Length(3),
                Constraint::Min(6),
            ])
            .split(columns[1]);

        if task_height > 0 {
            self.render_tasks(frame, right_column[0], snap);
        }
        self.render_tabs(frame, right_column[1], snap);
        self.render_report(frame, right_column[2], snap);
    }

    fn render_history(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(format!(" History ({}/{}) ", snap.history.len(), snap.history_total))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow));

        if snap.history.is_empty() {
            let text = if snap.history_loading {
                "  Loading history..."
            } else {
                "  No reports in the last 30 days."
            };
            let paragraph = Paragraph::new(Line::from(Span::styled(
                text,
                Style::default().fg(Color::DarkGray),
            )))
            .block(block);
            frame.render_widget(paragraph, area);
            return;
        }

        // One line is reserved for the footer.
        let rows_visible = area.height.saturating_sub(3).max(1) as usize;
        let cursor = self.history_cursor.min(snap.history.len() - 1);
        let start = (cursor + 1).saturating_sub(rows_visible);

        let mut lines: Vec<Line> = snap
            .history
            .iter()
            .enumerate()
            .skip(start)
            .take(rows_visible)
            .map(|(i, row)| {
                let is_selected = snap.selected_query_id.as_deref() == Some(row.query_id.as_str());
                let marker = if i == cursor { ">" } else { " " };
                let title_style = if is_selected {
                    Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::White)
                };
                let mut spans = vec![
                    Span::styled(format!("{marker}{:>3} ", i + 1), Style::default().fg(Color::DarkGray)),
                    Span::styled(views::truncate(&row.title, 14), title_style),
                    Span::styled(format!(" {}", row.stock_code), Style::default().fg(Color::Gray)),
                ];
                if let Some((badge, color)) = &row.badge {
                    spans.push(Span::styled(format!(" {badge}"), Style::default().fg(*color)));
                }
                if let Some(score) = row.sentiment_score {
                    spans.push(Span::styled(
                        format!(" {score}"),
                        Style::default().fg(views::sentiment_color(score)),
                    ));
                }
                spans.push(Span::styled(
                    format!(" {}", row.created_at),
                    Style::default().fg(Color::DarkGray),
                ));
                Line::from(spans)
            })
            .collect();

        let footer = if snap.history_loading_more {
            format!("  {} Loading more...", views::spinner_frame(self.tick))
        } else if snap.history_all_loaded {
            "  All records loaded".to_string()
        } else {
            "  /more or PgDn past the end for more".to_string()
        };
        lines.push(Line::from(Span::styled(footer, Style::default().fg(Color::DarkGray))));

        let paragraph = Paragraph::new(lines).block(block);
        frame.render_widget(paragraph, area);
    }

    fn render_tasks(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(format!(" Tasks ({}) ", snap.tasks.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White));

        let rows: Vec<Row> = snap
            .tasks
            .iter()
            .map(|task| {
                Row::new(vec![
                    Cell::from(Span::styled(
                        format!("  {}", views::truncate(&task.stock, 16)),
                        Style::default().fg(Color::White),
                    )),
                    Cell::from(Span::styled(task.model.clone(), Style::default().fg(Color::Cyan))),
                    Cell::from(Span::styled(
                        views::format_task_status(task.status),
                        Style::default().fg(views::task_status_color(task.status)),
                    )),
                    Cell::from(Span::styled(
                        views::truncate(&task.detail, 40),
                        Style::default().fg(Color::Gray),
                    )),
                ])
            })
            .collect();

        let table = Table::new(
            rows,
            [
                Constraint::Percentage(26),
                Constraint::Percentage(18),
                Constraint::Percentage(14),
                Constraint::Percentage(42),
            ],
        )
        .block(block)
        .header(
            Row::new(vec!["  Stock", "Model", "Status", "Detail"])
                .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD)),
        );

        frame.render_widget(table, area);
    }

    fn render_tabs(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::LightBlue));

        let line = if snap.tabs.is_empty() {
            Line::from(Span::styled("  No model results yet", Style::default().fg(Color::DarkGray)))
        } else {
            let mut spans = vec![Span::raw(" ")];
            for tab in &snap.tabs {
                let indicator = if tab.loading {
                    views::spinner_frame(self.tick)
                } else if tab.has_report {
                    "●"
                } else {
                    " "
                };
                let (badge, color) = views::provider_badge(&tab.key, &snap.names);
                let mut style = Style::default().fg(color);
                if tab.key == snap.active_tab {
                    style = style.add_modifier(Modifier::REVERSED | Modifier::BOLD);
                }
                spans.push(Span::styled(format!(" {indicator} {badge} {} ", tab.label), style));
                spans.push(Span::raw(" "));
            }
            Line::from(spans)
        };

        frame.render_widget(Paragraph::new(line).block(block), area);
    }

    fn render_report(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(" Report ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White));

        let mut lines: Vec<Line> = Vec::new();
        if let Some(banner) = &snap.error_banner {
            lines.push(Line::from(Span::styled(
                format!("  ! {banner}"),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            )));
            lines.push(Line::from(""));
        }

        match &snap.report {
            Some(report) => lines.extend(report_lines(report, &snap.names)),
            None if snap.report_loading => {
                let who = if snap.tabs.is_empty() {
                    "Report".to_string()
                } else {
                    snap.active_label.clone()
                };
                lines.push(Line::from(Span::styled(
                    format!("  {} {who} is loading...", views::spinner_frame(self.tick)),
                    Style::default().fg(Color::Yellow),
                )));
            }
            None => lines.push(Line::from(Span::styled(
                "  Enter a stock code below to analyze it, or /open a history record.",
                Style::default().fg(Color::DarkGray),
            ))),
        }

        let paragraph = Paragraph::new(lines).block(block).wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    /// Console messages and state events, interleaved by time.
    fn render_console_output(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(" Console Output ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White));

        let inner_height = area.height.saturating_sub(2) as usize;

        let mut entries: Vec<(chrono::DateTime<chrono::Utc>, &str, Color)> = self
            .console_messages
            .iter()
            .map(|(ts, msg, color)| (*ts, msg.as_str(), *color))
            .chain(
                snap.event_log
                    .iter()
                    .map(|e| (e.timestamp, e.message.as_str(), category_color(e.category))),
            )
            .collect();
        entries.sort_by_key(|(ts, _, _)| *ts);

        let start = entries.len().saturating_sub(inner_height);
        let lines: Vec<Line> = entries[start..]
            .iter()
            .map(|(ts, msg, color)| {
                Line::from(vec![
                    Span::styled(
                        format!("  [{}] ", ts.with_timezone(&chrono::Local).format("%H:%M:%S")),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled(*msg, Style::default().fg(*color)),
                ])
            })
            .collect();

        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn render_input(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(" Stock Code (Enter = analyze, /help = commands, /quit = exit) ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green));

        let input_display = if self.input.is_empty() {
            Line::from(vec![
                Span::styled("  > ", Style::default().fg(Color::Green)),
                Span::styled(
                    "600519, HK00700, AAPL or /command...",
                    Style::default().fg(Color::DarkGray),
                ),
            ])
        } else {
            Line::from(vec![
                Span::styled("  > ", Style::default().fg(Color::Green)),
                Span::styled(&self.input, Style::default().fg(Color::White)),
            ])
        };

        let notice = if let Some(err) = &snap.input_error {
            Span::styled(format!("  {err}"), Style::default().fg(Color::Red))
        } else if let Some(dup) = &snap.duplicate_notice {
            Span::styled(format!("  {dup}"), Style::default().fg(Color::Yellow))
        } else {
            Span::styled(
                "  Ctrl+C or /quit to exit  |  Up/Down for history  |  Tab to switch models",
                Style::default().fg(Color::DarkGray),
            )
        };

        let paragraph =
            Paragraph::new(vec![Line::from(""), input_display, Line::from(notice)]).block(block);
        frame.render_widget(paragraph, area);

        let cursor_x = area.x + 4 + self.cursor_pos as u16;
        let cursor_y = area.y + 2;
        frame.set_cursor_position((cursor_x, cursor_y));
    }

    // ── Input ───────────────────────────────────────────────────────

    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> KeyAction {
        match (code, modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => return KeyAction::Quit,
            (KeyCode::Char('o'), KeyModifiers::CONTROL) => return KeyAction::OpenHistory,
            (KeyCode::Char(c), _) => {
                let at = self.byte_index(self.cursor_pos);
                self.input.insert(at, c);
                self.cursor_pos += 1;
            }
            (KeyCode::Backspace, _) => {
                if self.cursor_pos > 0 {
                    let at = self.byte_index(self.cursor_pos - 1);
                    self.input.remove(at);
                    self.cursor_pos -= 1;
                }
            }
            (KeyCode::Delete, _) => {
                if self.cursor_pos < self.input.chars().count() {
                    let at = self.byte_index(self.cursor_pos);
                    self.input.remove(at);
                }
            }
            (KeyCode::Left, _) => {
                self.cursor_pos = self.cursor_pos.saturating_sub(1);
            }
            (KeyCode::Right, _) => {
                if self.cursor_pos < self.input.chars().count() {
                    self.cursor_pos += 1;
                }
            }
            (KeyCode::Home, _) => {
                self.cursor_pos = 0;
            }
            (KeyCode::End, _) => {
                self.cursor_pos = self.input.chars().count();
            }
            (KeyCode::Up, _) => {
                if !self.history.is_empty() {
                    let pos = match self.history_pos {
                        Some(p) if p > 0 => p - 1,
                        Some(p) => p,
                        None => self.history.len() - 1,
                    };
                    self.history_pos = Some(pos);
                    self.set_input(self.history[pos].clone());
                }
            }
            (KeyCode::Down, _) => {
                if let Some(pos) = self.history_pos {
                    if pos + 1 < self.history.len() {
                        self.history_pos = Some(pos + 1);
                        self.set_input(self.history[pos + 1].clone());
                    } else {
                        self.history_pos = None;
                        self.set_input(String::new());
                    }
                }
            }
            (KeyCode::Enter, _) => return KeyAction::Submit,
            (KeyCode::Tab, _) => return KeyAction::NextTab,
            (KeyCode::BackTab, _) => return KeyAction::PrevTab,
            (KeyCode::PageUp, _) => {
                self.history_cursor = self.history_cursor.saturating_sub(1);
            }
            (KeyCode::PageDown, _) => {
                self.history_cursor += 1;
                return KeyAction::LoadMore;
            }
            _ => {}
        }
        KeyAction::None
    }

    /// Keep the history cursor on a row; ask for the next page when the
    /// user scrolled past the last one.
    async fn clamp_history_cursor(&mut self) -> bool {
        let len = self.reconciler.state().read().await.history.items.len();
        if len == 0 {
            self.history_cursor = 0;
            return false;
        }
        if self.history_cursor >= len {
            self.history_cursor = len - 1;
            return true;
        }
        false
    }
}

/// Report body: overview, summary and the strategy card.
fn report_lines<'a>(report: &'a AnalysisReport, names: &DisplayNames) -> Vec<Line<'a>> {
    let direction = PriceDirection::from_change_pct(report.meta.change_pct);
    let score = report.summary.sentiment_score;

    let mut header = vec![Span::styled(
        format!("  {}", views::report_title(report)),
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
    )];
    if let Some(model) = report.provider_key() {
        let (badge, color) = views::provider_badge(model, names);
        header.push(Span::styled(format!("  {badge}"), Style::default().fg(color)));
    }
    header.push(Span::styled(
        format!("  {}", format_timestamp(&report.meta.created_at)),
        Style::default().fg(Color::DarkGray),
    ));

    let mut lines = vec![
        Line::from(header),
        Line::from(vec![
            Span::styled("  Price: ", Style::default().fg(Color::Gray)),
            Span::styled(
                views::price_line(report),
                Style::default().fg(views::direction_color(direction)),
            ),
            Span::styled("   Sentiment: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("[{}] {}", views::sentiment_gauge(score), views::sentiment_text(report)),
                Style::default().fg(views::sentiment_color(score)),
            ),
        ]),
        Line::from(""),
    ];

    for (label, text) in [
        ("Summary", &report.summary.analysis_summary),
        ("Advice", &report.summary.operation_advice),
        ("Trend", &report.summary.trend_prediction),
    ] {
        if text.is_empty() {
            continue;
        }
        lines.push(Line::from(vec![
            Span::styled(format!("  {label}: "), Style::default().fg(Color::Cyan)),
            Span::styled(text.as_str(), Style::default().fg(Color::White)),
        ]));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "  Strategy",
        Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD),
    )));
    for (label, value) in views::strategy_rows(report.strategy.as_ref()) {
        let color = if value == views::MISSING { Color::DarkGray } else { Color::White };
        lines.push(Line::from(vec![
            Span::styled(format!("    {label:<14}"), Style::default().fg(Color::Gray)),
            Span::styled(value, Style::default().fg(color)),
        ]));
    }
    lines
}

fn category_color(category: LogCategory) -> Color {
    match category {
        LogCategory::System => Color::Cyan,
        LogCategory::Task => Color::White,
        LogCategory::Report => Color::Green,
        LogCategory::History => Color::Gray,
        LogCategory::Stream => Color::LightBlue,
        LogCategory::Warning => Color::Yellow,
        LogCategory::Error => Color::Red,
    }
}

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Run the dashboard event loop.
///
/// `stream` carries task stream messages; `None` marks the stream as
/// disabled. Providers and the first history page are loaded in the
/// background once the UI is up.
pub async fn run_dashboard_console<A: AnalysisApi + ?Sized + 'static>(
    reconciler: Reconciler<A>,
    stream: Option<mpsc::Receiver<StreamMessage>>,
) -> Result<(), anyhow::Error> {
    use std::io::IsTerminal;
    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        return Err(anyhow::anyhow!("The dashboard console requires a terminal (TTY)."));
    }

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));

    let mut background: Vec<JoinHandle<()>> = Vec::new();
    match stream {
        Some(rx) => {
            let r = reconciler.clone();
            background.push(tokio::spawn(async move { r.run_stream(rx).await }));
        }
        None => reconciler.state().write().await.stream_status = StreamStatus::Disabled,
    }
    {
        let r = reconciler.clone();
        background.push(tokio::spawn(async move {
            if r.load_providers().await.is_ok() {
                let _ = r.refresh_history(true).await;
            }
        }));
    }

    let mut terminal = setup_terminal()?;
    let mut console = DashboardConsole::new(reconciler);
    let tick_rate = Duration::from_millis(100);

    loop {
        console.drain_events().await;
        console.reconciler.prune_finished_tasks(Instant::now()).await;
        console.tick = console.tick.wrapping_add(1);

        let snapshot = console.snapshot().await;
        terminal.draw(|frame| console.render(frame, &snapshot))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key_event) = event::read()? {
                if key_event.kind != KeyEventKind::Press {
                    continue;
                }
                match console.handle_key(key_event.code, key_event.modifiers) {
                    KeyAction::Quit => break,
                    KeyAction::Submit => {
                        let trimmed = console.input.trim();
                        if trimmed == "/quit" || trimmed == "/exit" || trimmed == "/q" {
                            break;
                        }
                        console.process_input().await;
                    }
                    KeyAction::NextTab => console.cycle_tab(true).await,
                    KeyAction::PrevTab => console.cycle_tab(false).await,
                    KeyAction::OpenHistory => console.open_highlighted().await,
                    KeyAction::LoadMore => {
                        if console.clamp_history_cursor().await {
                            console.load_more();
                        }
                    }
                    KeyAction::None => {}
                }
            }
        }
    }

    for handle in background {
        handle.abort();
    }
    restore_terminal(&mut terminal)?;
    Ok(())
}
