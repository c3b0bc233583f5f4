//! Configuration management for Schwabot
//!
//! Loads from an optional YAML file + environment variables via .env.
//! Every knob has a default so a bare environment still boots.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub quotes: QuotesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// API host override (tests/staging); unset means production endpoints
    #[serde(default)]
    pub base_url: Option<String>,
    /// Encrypted account id from the account-numbers endpoint
    #[serde(default)]
    pub account_hash: String,
    /// Already-issued OAuth access token; acquisition/refresh is external
    #[serde(default)]
    pub access_token: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            account_hash: String::new(),
            access_token: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Tracked suggestion collection (JSON)
    #[serde(default = "default_suggestions_path")]
    pub suggestions_path: String,
    /// Realized-trade CSV log
    #[serde(default = "default_trade_log_path")]
    pub trade_log_path: String,
    /// Fail hard on trade-log write errors instead of logging and continuing
    #[serde(default)]
    pub strict_trade_log: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            suggestions_path: default_suggestions_path(),
            trade_log_path: default_trade_log_path(),
            strict_trade_log: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Broker order lookback in days (clamped 1-30 at the call site)
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    /// Max orders fetched per tick (clamped 25-2000 at the call site)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Seconds between reconcile ticks
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            max_results: default_max_results(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Suppression window in minutes; 0 disables suppression
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,
    /// Confidence gain (0-100 points) that overrides suppression
    #[serde(default = "default_min_confidence_delta")]
    pub min_confidence_delta: f64,
    /// Max tracked (strategy, symbol, direction) keys
    #[serde(default = "default_dedup_capacity")]
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            min_confidence_delta: default_min_confidence_delta(),
            capacity: default_dedup_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotesConfig {
    /// Quote staleness window in milliseconds
    #[serde(default = "default_quote_ttl_ms")]
    pub cache_ttl_ms: i64,
}

impl Default for QuotesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: default_quote_ttl_ms(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_suggestions_path() -> String {
    "data/suggestions.json".to_string()
}

fn default_trade_log_path() -> String {
    "data/trades/closed_trades.csv".to_string()
}

fn default_lookback_days() -> i64 {
    7
}

fn default_max_results() -> u32 {
    500
}

fn default_tick_interval_secs() -> u64 {
    300
}

fn default_window_minutes() -> i64 {
    30
}

fn default_min_confidence_delta() -> f64 {
    10.0
}

fn default_dedup_capacity() -> usize {
    crate::dedup::DEFAULT_DEDUP_CAPACITY
}

fn default_quote_ttl_ms() -> i64 {
    crate::broker::quotes::DEFAULT_QUOTE_TTL_MS
}

impl AppConfig {
    /// Load from `path` (optional) with `SCHWABOT__SECTION__FIELD` env
    /// overrides, e.g. `SCHWABOT__BROKER__ACCESS_TOKEN`.
    pub fn load(path: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("SCHWABOT").separator("__"))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
