//! Tracing setup.
//!
//! The terminal UI owns stdout and stderr while it runs, so console mode
//! writes logs to a file; the one-shot commands log to stderr.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    File(PathBuf),
}

/// `~/.local/share/dsa/dsa-console.log` on Linux.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("dsa").join("dsa-console.log"))
}

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "info,dsa_console=debug,dsa_state=debug,dsa_client=debug"
    } else {
        "info"
    }
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(verbose: bool, sink: &LogSink) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let registry = tracing_subscriber::registry().with(filter);

    match sink {
        LogSink::Stderr => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogSink::File(path) => {
            let file = open_log_file(path)?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init()
        }
    }
    Ok(())
}
