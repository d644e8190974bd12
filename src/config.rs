// src/config.rs
//
// Central configuration for the connector, ledger and scheduler.
// Constructed once at startup and passed by reference into every
// component; the core never reads the environment or disk on its own.
// `Settings::from_env` is a convenience constructor for binaries.

use crate::types::TimestampMs;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Credentials,
    /// REST base URL (live or sandbox).
    pub rest_url: String,
    /// Streaming endpoint URL.
    pub ws_url: String,
    /// Optional HTTP proxy for all REST traffic.
    pub http_proxy: Option<String>,
    /// Default leverage applied to lazily created positions.
    pub default_leverage: f64,
    /// Whether new positions use isolated margin.
    pub isolated_margin: bool,
    /// Starting wallet balance for fresh accounts (backtest).
    pub initial_balance: f64,
    /// Retry budget for idempotent (GET/DELETE) calls. POST/PUT default
    /// to zero; callers must raise the budget explicitly.
    pub default_retries: u32,
    /// Seconds added to the current time when signing, so a request
    /// remains valid under modest local clock offset.
    pub auth_expiry_margin_secs: i64,
    /// Send a ping when no frame has been observed for this long.
    pub ping_interval_secs: u64,
    /// Row cap for the quote mirror (oldest half dropped beyond it).
    pub quote_cap: usize,
    /// Row cap for the trade-feed mirror.
    pub trade_cap: usize,
    /// Ladder depth covered by checksum validation.
    pub checksum_depth: usize,
    /// Equity sampling cadence in the backtest loop.
    pub stats_interval_ms: i64,
    /// Simulated clock window for backtests, inclusive of the start.
    pub sim_start_ms: TimestampMs,
    pub sim_end_ms: TimestampMs,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            credentials: Credentials::new("", ""),
            rest_url: "https://api.perpex.io".to_string(),
            ws_url: "wss://stream.perpex.io/realtime".to_string(),
            http_proxy: None,
            default_leverage: 1.0,
            isolated_margin: false,
            initial_balance: 100_000.0,
            default_retries: 5,
            auth_expiry_margin_secs: 5,
            ping_interval_secs: 5,
            quote_cap: 200,
            trade_cap: 200,
            checksum_depth: 25,
            stats_interval_ms: 86_400_000,
            sim_start_ms: 0,
            sim_end_ms: 0,
        }
    }
}

impl Settings {
    /// Settings pointed at the sandbox environment.
    pub fn sandbox() -> Self {
        Self {
            rest_url: "https://api-sandbox.perpex.io".to_string(),
            ws_url: "wss://stream-sandbox.perpex.io/realtime".to_string(),
            ..Self::default()
        }
    }

    /// Build settings from `PERPETUA_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Self {
        use std::env;

        let mut settings = if env_is_true("PERPETUA_SANDBOX") {
            Self::sandbox()
        } else {
            Self::default()
        };

        if let Ok(val) = env::var("PERPETUA_API_KEY") {
            settings.credentials.api_key = val;
        }
        if let Ok(val) = env::var("PERPETUA_API_SECRET") {
            settings.credentials.api_secret = val;
        }
        if let Ok(val) = env::var("PERPETUA_REST_URL") {
            settings.rest_url = val;
        }
        if let Ok(val) = env::var("PERPETUA_WS_URL") {
            settings.ws_url = val;
        }
        if let Ok(val) = env::var("PERPETUA_HTTP_PROXY") {
            settings.http_proxy = Some(val);
        }
        if let Ok(val) = env::var("PERPETUA_LEVERAGE") {
            if let Ok(leverage) = val.parse::<f64>() {
                settings.default_leverage = leverage.max(1.0);
            }
        }
        if let Ok(val) = env::var("PERPETUA_ISOLATED_MARGIN") {
            settings.isolated_margin = val.eq_ignore_ascii_case("true") || val == "1";
        }
        if let Ok(val) = env::var("PERPETUA_RETRY_MAX") {
            if let Ok(max) = val.parse::<u32>() {
                settings.default_retries = max;
            }
        }
        if let Ok(val) = env::var("PERPETUA_PING_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                settings.ping_interval_secs = secs.max(1);
            }
        }

        settings
    }

    pub fn has_auth(&self) -> bool {
        !self.credentials.api_key.is_empty() && !self.credentials.api_secret.is_empty()
    }
}

fn env_is_true(key: &str) -> bool {
    std::env::var(key)
        .map(|value| value.eq_ignore_ascii_case("true") || value == "1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_live_urls() {
        let settings = Settings::default();
        assert!(settings.rest_url.starts_with("https://api."));
        assert!(!settings.has_auth());
        assert_eq!(settings.default_retries, 5);
    }

    #[test]
    fn sandbox_switches_both_endpoints() {
        let settings = Settings::sandbox();
        assert!(settings.rest_url.contains("sandbox"));
        assert!(settings.ws_url.contains("sandbox"));
    }
}
