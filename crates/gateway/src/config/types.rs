use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::book::BookConfig;

/// Root configuration for the feed engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfigFile {
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub global: GlobalConfig,
}

/// Configuration for a single exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Unique identifier for the exchange (e.g., "bitvavo", "kraken")
    pub id: String,
    /// Display name
    pub name: String,
    /// Whether this exchange is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// WebSocket URL for the market data feed
    pub ws_url: String,
    /// REST API base URL for snapshot fetching
    pub rest_url: String,
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// API secret for signing requests
    #[serde(default)]
    pub api_secret: String,
    /// Markets to subscribe to
    #[serde(default)]
    pub markets: Vec<String>,
    /// Feed tuning overrides for this exchange
    #[serde(default)]
    pub tuning: FeedTuningJson,
}

/// Global configuration that applies to all exchanges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Delay between reconnection attempts in milliseconds (fixed, not
    /// exponential: feeds should come back fast and exchanges rate-limit
    /// on their side)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Force a reconnect after this long without any inbound message
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
    /// Keepalive ping interval in milliseconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,
    /// How often to sweep books for validity while connected
    #[serde(default = "default_validity_check_interval")]
    pub validity_check_interval_ms: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            reconnect_delay_ms: default_reconnect_delay(),
            idle_timeout_ms: default_idle_timeout(),
            keepalive_interval_ms: default_keepalive_interval(),
            validity_check_interval_ms: default_validity_check_interval(),
        }
    }
}

/// Per-exchange feed tuning (JSON representation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedTuningJson {
    /// Pause between snapshot fetches in milliseconds (rate limiting)
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_ms: u64,
    /// Out-of-order batches a market may park before gaps are skipped
    #[serde(default = "default_max_pending_values")]
    pub max_pending_values: usize,
    /// Deltas a book may queue before its snapshot arrives
    #[serde(default = "default_max_queued_deltas")]
    pub max_queued_deltas: usize,
    /// Validity grace after creation or clear, in milliseconds
    #[serde(default = "default_warmup")]
    pub warmup_ms: u64,
    /// How long a book stays valid after it was last fully populated
    #[serde(default = "default_staleness")]
    pub staleness_ms: u64,
}

impl Default for FeedTuningJson {
    fn default() -> Self {
        FeedTuningJson {
            snapshot_interval_ms: default_snapshot_interval(),
            max_pending_values: default_max_pending_values(),
            max_queued_deltas: default_max_queued_deltas(),
            warmup_ms: default_warmup(),
            staleness_ms: default_staleness(),
        }
    }
}

/// Resolved runtime configuration for one exchange session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub reconnect_delay: Duration,
    pub idle_timeout: Duration,
    pub keepalive_interval: Duration,
    pub validity_check_interval: Duration,
    pub snapshot_interval: Duration,
    pub max_pending_values: usize,
    pub book: BookConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        FeedTuningJson::default().session_config(&GlobalConfig::default())
    }
}

impl ExchangeConfig {
    /// Resolve this exchange's runtime session configuration
    pub fn session_config(&self, global: &GlobalConfig) -> SessionConfig {
        self.tuning.session_config(global)
    }
}

impl FeedTuningJson {
    /// Combine with global settings into a runtime [`SessionConfig`]
    pub fn session_config(&self, global: &GlobalConfig) -> SessionConfig {
        SessionConfig {
            reconnect_delay: Duration::from_millis(global.reconnect_delay_ms),
            idle_timeout: Duration::from_millis(global.idle_timeout_ms),
            keepalive_interval: Duration::from_millis(global.keepalive_interval_ms),
            validity_check_interval: Duration::from_millis(global.validity_check_interval_ms),
            snapshot_interval: Duration::from_millis(self.snapshot_interval_ms),
            max_pending_values: self.max_pending_values,
            book: BookConfig {
                warmup: Duration::from_millis(self.warmup_ms),
                staleness: Duration::from_millis(self.staleness_ms),
                max_queued_deltas: self.max_queued_deltas,
            },
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    2500
}

fn default_idle_timeout() -> u64 {
    30000
}

fn default_keepalive_interval() -> u64 {
    15000
}

fn default_validity_check_interval() -> u64 {
    5000
}

fn default_snapshot_interval() -> u64 {
    250
}

fn default_max_pending_values() -> usize {
    100
}

fn default_max_queued_deltas() -> usize {
    5000
}

fn default_warmup() -> u64 {
    10000
}

fn default_staleness() -> u64 {
    60000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_exchange_config() {
        let json = r#"{
            "id": "bitvavo",
            "name": "Bitvavo",
            "enabled": true,
            "ws_url": "wss://ws.bitvavo.com/v2/",
            "rest_url": "https://api.bitvavo.com/v2",
            "markets": ["BTC-EUR", "ETH-EUR"]
        }"#;

        let config: ExchangeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.id, "bitvavo");
        assert_eq!(config.markets.len(), 2);
        assert!(config.enabled);
    }

    #[test]
    fn test_defaults() {
        let json = r#"{
            "id": "test",
            "name": "Test",
            "ws_url": "ws://localhost",
            "rest_url": "http://localhost"
        }"#;

        let config: ExchangeConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert!(config.api_key.is_empty());
        assert_eq!(config.tuning.snapshot_interval_ms, 250);
        assert_eq!(config.tuning.max_pending_values, 100);
    }

    #[test]
    fn test_session_config_resolution() {
        let json = r#"{
            "id": "test",
            "name": "Test",
            "ws_url": "ws://localhost",
            "rest_url": "http://localhost",
            "tuning": { "snapshot_interval_ms": 50, "staleness_ms": 5000 }
        }"#;
        let exchange: ExchangeConfig = serde_json::from_str(json).unwrap();

        let global = GlobalConfig {
            reconnect_delay_ms: 1000,
            ..GlobalConfig::default()
        };
        let session = exchange.session_config(&global);

        assert_eq!(session.reconnect_delay, Duration::from_millis(1000));
        assert_eq!(session.snapshot_interval, Duration::from_millis(50));
        assert_eq!(session.book.staleness, Duration::from_millis(5000));
        // Untouched knobs keep their defaults
        assert_eq!(session.idle_timeout, Duration::from_millis(30000));
        assert_eq!(session.book.max_queued_deltas, 5000);
    }
}
