// =============================================================================
// Runtime Configuration: agent settings with JSON file + env overrides
// =============================================================================
//
// All fields carry `#[serde(default)]` so that a partial (or empty) config
// file still loads.  Environment variables applied by `apply_env` win over the
// file; `validate` runs last and rejects settings the cache or socket client
// cannot work with.
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::socket::socket_url_from_api_url;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_interval() -> String {
    "15m".to_string()
}

fn default_limit() -> u32 {
    100
}

fn default_cache_ttl_secs() -> u64 {
    5 * 60
}

fn default_max_requests_per_minute() -> u32 {
    30
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_reconnect_delay_secs() -> u64 {
    10
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_subscribe_channel() -> String {
    "agent_live_game_list".to_string()
}

// =============================================================================
// MarketDataConfig
// =============================================================================

/// Upstream klines source and cache budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Kline interval requested from the exchange.
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Candles per request.
    #[serde(default = "default_limit")]
    pub limit: u32,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Upstream calls allowed per rate window.
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,

    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,

    /// Suppression period after the budget is blown or the upstream says 429.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            interval: default_interval(),
            limit: default_limit(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_requests_per_minute: default_max_requests_per_minute(),
            rate_window_secs: default_rate_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// =============================================================================
// SocketConfig
// =============================================================================

/// Game push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// `wss://` endpoint.  Usually derived from `API_URL`.
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_subscribe_channel")]
    pub subscribe_channel: String,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            subscribe_channel: default_subscribe_channel(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub market_data: MarketDataConfig,

    #[serde(default)]
    pub socket: SocketConfig,
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            interval = %config.market_data.interval,
            "config loaded"
        );

        Ok(config)
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup` (env var name -> value).
    ///
    /// `AGENT_SOCKET_URL` takes precedence over the URL derived from
    /// `API_URL`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_url) = lookup("API_URL") {
            match socket_url_from_api_url(&api_url) {
                Some(url) => self.socket.url = url,
                None => warn!(api_url = %api_url, "API_URL is not an http(s) URL, ignoring"),
            }
        }
        if let Some(url) = lookup("AGENT_SOCKET_URL") {
            self.socket.url = url;
        }
        if let Some(base) = lookup("BINANCE_BASE_URL") {
            self.market_data.base_url = base;
        }
        if let Some(interval) = lookup("AGENT_KLINE_INTERVAL") {
            self.market_data.interval = interval;
        }
    }

    /// Reject settings that would make the cache or socket client unusable.
    pub fn validate(&self) -> Result<()> {
        let md = &self.market_data;
        if md.cache_ttl_secs == 0 {
            bail!("market_data.cache_ttl_secs must be greater than zero");
        }
        if md.max_requests_per_minute == 0 {
            bail!("market_data.max_requests_per_minute must be greater than zero");
        }
        if md.rate_window_secs == 0 || md.cooldown_secs == 0 {
            bail!("market_data.rate_window_secs and cooldown_secs must be greater than zero");
        }
        if md.limit == 0 {
            bail!("market_data.limit must be greater than zero");
        }
        if self.socket.url.is_empty() {
            bail!("socket.url is empty; set API_URL or AGENT_SOCKET_URL");
        }
        if !self.socket.url.starts_with("ws://") && !self.socket.url.starts_with("wss://") {
            bail!("socket.url must be a ws:// or wss:// URL, got {}", self.socket.url);
        }
        Ok(())
    }
}
