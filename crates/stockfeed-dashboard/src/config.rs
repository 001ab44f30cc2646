//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use stockfeed_core::{Key, DEFAULT_PADDING_FRACTION, DEFAULT_WINDOW_CAPACITY};
use stockfeed_ws::ConnectionConfig;

/// Initial price snapshot endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteConfig {
    /// Scheme and authority of the REST API.
    #[serde(default = "default_api_root")]
    pub api_root: String,
    /// Resource prefix; the key is appended.
    #[serde(default = "default_quote_path")]
    pub path: String,
    #[serde(default = "default_quote_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_api_root() -> String {
    "https://localhost:7216".to_string()
}

fn default_quote_path() -> String {
    "api/stocks".to_string()
}

fn default_quote_timeout_ms() -> u64 {
    10_000
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            api_root: default_api_root(),
            path: default_quote_path(),
            timeout_ms: default_quote_timeout_ms(),
        }
    }
}

/// Rolling window and startup keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Observations kept per key.
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// Fraction of the min/max range added on both sides of the chart axis.
    #[serde(default = "default_padding_fraction")]
    pub padding_fraction: f64,
    /// Keys requested on the first successful connection.
    #[serde(default = "default_initial_keys")]
    pub initial_keys: Vec<String>,
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

fn default_padding_fraction() -> f64 {
    DEFAULT_PADDING_FRACTION
}

fn default_initial_keys() -> Vec<String> {
    ["AMZN", "MSFT", "META", "NVDA", "TSLA", "BABA", "PYPL"]
        .iter()
        .map(|k| k.to_string())
        .collect()
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            padding_fraction: default_padding_fraction(),
            initial_keys: default_initial_keys(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info,stockfeed=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub hub: ConnectionConfig,
    #[serde(default)]
    pub quote: QuoteConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML content.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.hub.url.trim().is_empty() {
            return Err(AppError::Config("hub.url must not be empty".to_string()));
        }
        if self.dashboard.window_capacity == 0 {
            return Err(AppError::Config(
                "dashboard.window_capacity must be > 0".to_string(),
            ));
        }
        let padding = self.dashboard.padding_fraction;
        if !padding.is_finite() || padding < 0.0 {
            return Err(AppError::Config(format!(
                "dashboard.padding_fraction must be a non-negative number, got {padding}"
            )));
        }
        for raw in &self.dashboard.initial_keys {
            Key::parse(raw).map_err(|e| AppError::Config(format!("dashboard.initial_keys: {e}")))?;
        }
        Ok(())
    }
}
