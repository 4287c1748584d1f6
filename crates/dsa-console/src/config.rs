//! Dashboard configuration.
//!
//! Loaded from a TOML file, `~/.config/dsa/config.toml` by default. Every
//! section and key is optional; a missing default file yields the built-in
//! defaults, while a missing file named explicitly is an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use dsa_client::{HttpApiConfig, StreamConfig};
use dsa_protocol::{
    DisplayNames, DEFAULT_BASE_URL, HISTORY_PAGE_SIZE, HISTORY_WINDOW_DAYS,
};
use dsa_state::ReconcilerConfig;

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamSection {
    pub enabled: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 0 retries forever.
    pub max_retries: u32,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: 500,
            max_backoff_ms: 15_000,
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistorySection {
    pub page_size: u32,
    pub window_days: i64,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            page_size: HISTORY_PAGE_SIZE,
            window_days: HISTORY_WINDOW_DAYS,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    pub server: ServerSection,
    pub stream: StreamSection,
    pub history: HistorySection,
    /// Provider key to label overrides. Labels reported by the backend
    /// still take precedence.
    pub display_names: HashMap<String, String>,
}

/// `~/.config/dsa/config.toml` on Linux, the platform equivalent elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dsa").join("config.toml"))
}

impl DashboardConfig {
    /// Load from `path`, or from [`default_config_path`] when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.server.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "server.base_url must start with http:// or https://, got {url:?}"
            )));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.request_timeout_secs must be positive".into(),
            ));
        }
        if !(1..=100).contains(&self.history.page_size) {
            return Err(ConfigError::Invalid(
                "history.page_size must be between 1 and 100".into(),
            ));
        }
        if self.history.window_days <= 0 {
            return Err(ConfigError::Invalid(
                "history.window_days must be positive".into(),
            ));
        }
        if self.stream.initial_backoff_ms == 0
            || self.stream.max_backoff_ms < self.stream.initial_backoff_ms
        {
            return Err(ConfigError::Invalid(
                "stream backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    /// Replace the backend address, e.g. from the command line.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Result<Self, ConfigError> {
        if let Some(url) = base_url {
            self.server.base_url = url;
            self.validate()?;
        }
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        self.server.base_url.trim().trim_end_matches('/')
    }

    pub fn http_config(&self) -> HttpApiConfig {
        HttpApiConfig {
            base_url: self.base_url().to_string(),
            timeout: Duration::from_secs(self.server.request_timeout_secs),
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            initial_backoff: Duration::from_millis(self.stream.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.stream.max_backoff_ms),
            max_retries: self.stream.max_retries,
            ..StreamConfig::for_base_url(self.base_url())
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            history_page_size: self.history.page_size,
            history_window_days: self.history.window_days,
        }
    }

    /// Legacy labels overlaid with the configured overrides.
    pub fn display_names(&self) -> DisplayNames {
        let mut names = DisplayNames::with_legacy_defaults();
        names.apply_overrides(&self.display_names);
        names
    }
}
