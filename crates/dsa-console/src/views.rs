//! Formatting helpers shared by the terminal UI and the one-shot commands.

use ratatui::style::Color;

use dsa_protocol::{
    badge_label, badge_slot, format_change_pct, AnalysisReport, DisplayNames, PriceDirection,
    ReportStrategy, SentimentBand, TaskStatus,
};
use dsa_state::StreamStatus;

/// Placeholder for a missing strategy point.
pub const MISSING: &str = "—";

const BADGE_COLORS: [Color; dsa_protocol::BADGE_PALETTE_SIZE] = [
    Color::Cyan,
    Color::Magenta,
    Color::Yellow,
    Color::LightBlue,
    Color::LightGreen,
    Color::LightRed,
    Color::LightMagenta,
];

const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

/// Badge text and colour for a provider key.
pub fn provider_badge(key: &str, names: &DisplayNames) -> (String, Color) {
    (badge_label(names.label(key)), BADGE_COLORS[badge_slot(key)])
}

/// Rising prices are red and falling prices green.
pub fn direction_color(direction: PriceDirection) -> Color {
    match direction {
        PriceDirection::Up => Color::Red,
        PriceDirection::Down => Color::Green,
        PriceDirection::Flat | PriceDirection::Unknown => Color::Gray,
    }
}

pub fn sentiment_color(score: i32) -> Color {
    match SentimentBand::from_score(score) {
        SentimentBand::VeryBullish => Color::LightRed,
        SentimentBand::Bullish => Color::Red,
        SentimentBand::Neutral => Color::Yellow,
        SentimentBand::Bearish => Color::Green,
        SentimentBand::VeryBearish => Color::LightGreen,
    }
}

/// Ten-cell bar for a 0-100 score.
pub fn sentiment_gauge(score: i32) -> String {
    let filled = (score.clamp(0, 100) as usize + 5) / 10;
    format!("{}{}", "#".repeat(filled), ".".repeat(10 - filled))
}

pub fn format_task_status(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "Pending",
        TaskStatus::Processing => "Analyzing",
        TaskStatus::Completed => "Completed",
        TaskStatus::Failed => "Failed",
        TaskStatus::Unknown => "Unknown",
    }
}

pub fn task_status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Pending => Color::Yellow,
        TaskStatus::Processing => Color::Blue,
        TaskStatus::Completed => Color::Green,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Unknown => Color::White,
    }
}

pub fn stream_status_label(status: StreamStatus) -> (String, Color) {
    match status {
        StreamStatus::Connecting => ("Connecting".to_string(), Color::Yellow),
        StreamStatus::Connected => ("Live".to_string(), Color::Green),
        StreamStatus::Reconnecting { attempt } => {
            (format!("Reconnecting ({attempt})"), Color::Yellow)
        }
        StreamStatus::Offline => ("Offline".to_string(), Color::Red),
        StreamStatus::Disabled => ("Disabled".to_string(), Color::DarkGray),
    }
}

pub fn spinner_frame(tick: u64) -> &'static str {
    SPINNER[(tick % SPINNER.len() as u64) as usize]
}

/// Truncate to `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// The four strategy points, with [`MISSING`] for absent values.
pub fn strategy_rows(strategy: Option<&ReportStrategy>) -> Vec<(&'static str, String)> {
    let strategy = strategy.cloned().unwrap_or_default();
    strategy
        .points()
        .into_iter()
        .map(|(label, value)| {
            let value = value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(MISSING);
            (label, value.to_string())
        })
        .collect()
}

/// `Kweichow Moutai (600519)`, or the bare code when the name is unknown.
pub fn report_title(report: &AnalysisReport) -> String {
    match report.meta.stock_name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => format!("{name} ({})", report.meta.stock_code),
        None => report.meta.stock_code.clone(),
    }
}

/// `1712.00  +1.23%`, or `--` when there is no quote.
pub fn price_line(report: &AnalysisReport) -> String {
    let price = report
        .meta
        .current_price
        .map(|p| format!("{p:.2}"))
        .unwrap_or_else(|| "--".to_string());
    format!("{price}  {}", format_change_pct(report.meta.change_pct))
}

/// Sentiment label reported by the backend, falling back to the band.
pub fn sentiment_text(report: &AnalysisReport) -> String {
    let score = report.summary.sentiment_score;
    let label = report
        .summary
        .sentiment_label
        .clone()
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| SentimentBand::from_score(score).label().to_string());
    format!("{score} {label}")
}

/// Plain-text rendering of a report for the one-shot commands.
pub fn report_text(report: &AnalysisReport, names: &DisplayNames) -> Vec<String> {
    let mut lines = vec![report_title(report)];
    if let Some(model) = report.provider_key() {
        lines.push(format!("Model:      {}", names.label(model)));
    }
    lines.push(format!("Price:      {}", price_line(report)));
    lines.push(format!(
        "Sentiment:  [{}] {}",
        sentiment_gauge(report.summary.sentiment_score),
        sentiment_text(report)
    ));
    for (label, text) in [
        ("Summary", &report.summary.analysis_summary),
        ("Advice", &report.summary.operation_advice),
        ("Trend", &report.summary.trend_prediction),
    ] {
        if !text.is_empty() {
            lines.push(format!("{:<11} {text}", format!("{label}:")));
        }
    }
    for (label, value) in strategy_rows(report.strategy.as_ref()) {
        lines.push(format!("{:<11} {value}", format!("{label}:")));
    }
    lines
}
