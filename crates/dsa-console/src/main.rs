//! Stock analysis dashboard (dsa-console) - Main entry point
//!
//! Without a subcommand, opens the interactive terminal dashboard. The
//! remaining subcommands are one-shot operations against the same backend,
//! useful from scripts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, RwLock};

mod config;
mod console;
mod logging;
mod views;

use config::DashboardConfig;
use dsa_client::{AnalysisApi, HttpApi, StreamMessage, TaskStream};
use dsa_protocol::{format_timestamp, HistoryQuery, TaskStatus};
use dsa_state::{DashboardState, Reconciler};
use logging::LogSink;

/// Command-line arguments for dsa-console
#[derive(Parser, Debug)]
#[command(name = "dsa-console")]
#[command(about = "Terminal dashboard for the stock analysis backend")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to ~/.config/dsa/config.toml)
    #[arg(short, long, global = true, env = "DSA_CONFIG")]
    config: Option<PathBuf>,

    /// Backend base URL, overriding the configuration file
    #[arg(short, long, global = true, env = "DSA_BASE_URL")]
    base_url: Option<String>,

    /// Enable debug logging for the dashboard crates
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the interactive dashboard (default)
    Console,
    /// List the configured AI providers
    Providers,
    /// List recent analysis reports
    History {
        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// Print a report by query id
    Report { query_id: String },
    /// Analyze a stock and wait for the reports
    Analyze {
        /// Stock code, e.g. 600519, HK00700 or AAPL
        code: String,
        /// Provider key; repeat for several models. Defaults to the first provider.
        #[arg(short, long = "model")]
        models: Vec<String>,
        /// Return once the tasks are queued instead of waiting for results
        #[arg(long)]
        no_wait: bool,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Console);

    let sink = match command {
        Command::Console => LogSink::File(
            logging::default_log_path()
                .unwrap_or_else(|| std::env::temp_dir().join("dsa-console.log")),
        ),
        _ => LogSink::Stderr,
    };
    logging::init(args.verbose, &sink).context("Failed to initialize logging")?;

    let config = DashboardConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?
        .with_base_url(args.base_url)
        .context("Invalid --base-url")?;
    tracing::info!(base_url = %config.base_url(), "Starting dsa-console");

    let api = Arc::new(HttpApi::new(config.http_config()).context("Failed to create HTTP client")?);
    let state = Arc::new(RwLock::new(DashboardState::new(config.display_names())));
    let reconciler = Reconciler::with_config(api, state, config.reconciler_config());

    match command {
        Command::Console => run_console(reconciler, &config).await,
        Command::Providers => list_providers(&reconciler).await,
        Command::History { page } => list_history(&reconciler, &config, page).await,
        Command::Report { query_id } => print_report(&reconciler, &query_id).await,
        Command::Analyze {
            code,
            models,
            no_wait,
            timeout_secs,
        } => {
            analyze(
                &reconciler,
                &config,
                &code,
                models,
                !no_wait,
                Duration::from_secs(timeout_secs),
            )
            .await
        }
    }
}

fn spawn_stream(config: &DashboardConfig) -> Result<Option<mpsc::Receiver<StreamMessage>>> {
    if !config.stream.enabled {
        tracing::info!("Task stream disabled in configuration");
        return Ok(None);
    }
    let (tx, rx) = mpsc::channel(64);
    TaskStream::new(config.stream_config())
        .context("Failed to create task stream client")?
        .spawn(tx);
    Ok(Some(rx))
}

async fn run_console(reconciler: Reconciler<HttpApi>, config: &DashboardConfig) -> Result<()> {
    let stream = spawn_stream(config)?;
    console::run_dashboard_console(reconciler, stream).await
}

async fn list_providers(reconciler: &Reconciler<HttpApi>) -> Result<()> {
    reconciler
        .load_providers()
        .await
        .context("Failed to fetch providers")?;
    let state = reconciler.state().read().await;
    if state.providers().is_empty() {
        println!("No providers configured.");
    }
    for p in state.providers() {
        let model = p.model_name.as_deref().unwrap_or("-");
        println!("{:<12} {:<16} {model}", p.key, state.label(&p.key));
    }
    Ok(())
}

async fn list_history(
    reconciler: &Reconciler<HttpApi>,
    config: &DashboardConfig,
    page: u32,
) -> Result<()> {
    // Labels only; the listing works without them.
    let _ = reconciler.load_providers().await;

    let query = HistoryQuery::recent(
        chrono::Local::now().date_naive(),
        config.history.window_days,
        page.max(1),
        config.history.page_size,
    );
    let result = reconciler
        .api()
        .history_list(&query)
        .await
        .context("Failed to fetch history")?;

    let state = reconciler.state().read().await;
    for item in &result.items {
        let model = item
            .model_name
            .as_deref()
            .map(|m| state.label(m))
            .unwrap_or_else(|| "-".to_string());
        let score = item
            .sentiment_score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<10} {:<16} {:<12} {score:>3}  {}",
            format_timestamp(&item.created_at),
            item.stock_code,
            views::truncate(item.title(), 16),
            model,
            item.query_id,
        );
    }
    let shown = (page.max(1) as u64 - 1) * config.history.page_size as u64 + result.items.len() as u64;
    println!("{shown} of {} record(s)", result.total);
    Ok(())
}

async fn print_report(reconciler: &Reconciler<HttpApi>, query_id: &str) -> Result<()> {
    let _ = reconciler.load_providers().await;
    let report = reconciler
        .api()
        .report_detail(query_id)
        .await
        .with_context(|| format!("Failed to fetch report {query_id}"))?;
    let state = reconciler.state().read().await;
    for line in views::report_text(&report, state.display_names()) {
        println!("{line}");
    }
    Ok(())
}

async fn analyze(
    reconciler: &Reconciler<HttpApi>,
    config: &DashboardConfig,
    code: &str,
    models: Vec<String>,
    wait: bool,
    timeout: Duration,
) -> Result<()> {
    reconciler
        .load_providers()
        .await
        .context("Failed to fetch providers")?;
    let selected = {
        let mut state = reconciler.state().write().await;
        let unknown: Vec<&str> = models
            .iter()
            .map(String::as_str)
            .filter(|m| !state.is_known_provider(m))
            .collect();
        if !unknown.is_empty() {
            anyhow::bail!("Unknown provider(s): {}", unknown.join(", "));
        }
        state.set_selected_models(models);
        state.selected_models().to_vec()
    };

    // Subscribe before submitting so no lifecycle event is missed.
    let mut stream = if wait { spawn_stream(config)? } else { None };

    let outcomes = reconciler.submit_analysis(code, &selected).await?;
    let mut pending: Vec<(String, String)> = Vec::new();
    for outcome in &outcomes {
        match &outcome.result {
            Ok(accepted) => {
                println!("{:<16} queued as {}", outcome.label, accepted.task_id);
                pending.push((accepted.task_id.clone(), outcome.model.clone()));
            }
            Err(e) => println!("{:<16} {e}", outcome.label),
        }
    }

    let Some(rx) = stream.as_mut() else {
        if wait && !pending.is_empty() {
            println!("Task stream disabled; check results with `dsa-console history`.");
        }
        return Ok(());
    };

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    while !pending.is_empty() {
        tokio::select! {
            _ = &mut deadline => {
                anyhow::bail!("Timed out waiting for {} task(s)", pending.len());
            }
            message = rx.recv() => {
                let Some(message) = message else {
                    anyhow::bail!("Task stream closed");
                };
                if let StreamMessage::GaveUp { attempts } = message {
                    anyhow::bail!("Task stream unavailable after {attempts} attempts");
                }
                reconciler.on_stream_message(message).await;
            }
        }

        let state = reconciler.state().read().await;
        pending.retain(|(task_id, model)| {
            let Some(task) = state.tasks.get(task_id) else {
                return true;
            };
            match task.info.status {
                TaskStatus::Completed => {
                    println!();
                    match state.report_for(model) {
                        Some(report) => {
                            for line in views::report_text(report, state.display_names()) {
                                println!("{line}");
                            }
                        }
                        None => println!("{}: report unavailable ({task_id})", state.label(model)),
                    }
                    false
                }
                TaskStatus::Failed => {
                    let reason = task
                        .info
                        .error
                        .as_deref()
                        .unwrap_or(dsa_protocol::DEFAULT_FAILURE_MESSAGE);
                    println!("\n{}: {reason}", state.label(model));
                    false
                }
                _ => true,
            }
        });
    }
    Ok(())
}
