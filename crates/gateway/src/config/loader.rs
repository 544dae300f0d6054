use std::path::Path;
use thiserror::Error;

use super::types::{ExchangeConfig, FeedConfigFile};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("No enabled exchanges in config")]
    NoEnabledExchanges,
    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),
    #[error("Exchange {exchange}: invalid {field} url: {reason}")]
    InvalidUrl {
        exchange: String,
        field: &'static str,
        reason: String,
    },
    #[error("Exchange {0}: no markets configured")]
    NoMarkets(String),
}

/// Load feed configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<FeedConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: FeedConfigFile = serde_json::from_str(&content)?;
    Ok(config)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<FeedConfigFile, ConfigError> {
    let config: FeedConfigFile = serde_json::from_str(json)?;
    Ok(config)
}

/// Load the default embedded configuration
pub fn load_default_config() -> Result<FeedConfigFile, ConfigError> {
    let default_config = include_str!("feed_config.json");
    load_config_from_str(default_config)
}

impl FeedConfigFile {
    /// Get only enabled exchanges
    pub fn enabled_exchanges(&self) -> Vec<&ExchangeConfig> {
        self.exchanges.iter().filter(|e| e.enabled).collect()
    }

    /// Get a specific exchange by ID
    pub fn get_exchange(&self, id: &str) -> Option<&ExchangeConfig> {
        self.exchanges.iter().find(|e| e.id == id)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_exchanges().is_empty() {
            return Err(ConfigError::NoEnabledExchanges);
        }
        for exchange in self.enabled_exchanges() {
            check_url(&exchange.id, "ws", &exchange.ws_url, &["ws", "wss"])?;
            check_url(&exchange.id, "rest", &exchange.rest_url, &["http", "https"])?;
            if exchange.markets.is_empty() {
                return Err(ConfigError::NoMarkets(exchange.id.clone()));
            }
        }
        Ok(())
    }
}

fn check_url(
    exchange: &str,
    field: &'static str,
    raw: &str,
    schemes: &[&str],
) -> Result<(), ConfigError> {
    let url = url::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        exchange: exchange.to_string(),
        field,
        reason: e.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidUrl {
            exchange: exchange.to_string(),
            field,
            reason: format!("unexpected scheme {}", url.scheme()),
        });
    }
    Ok(())
}
