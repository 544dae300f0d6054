//! Wires configuration, adapters, and sessions together.
//!
//! Adapters are registered at build time: the binary constructs an
//! [`AdapterRegistry`] naming every exchange it can speak to, and the
//! manager starts sessions only for exchanges that are both enabled in
//! config and present in the registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;

use bookflow_core::{ExchangeId, MarketId, QualifiedMarket, TradeBatch};

use crate::book::{BookManager, SharedBook};
use crate::config::{ConfigError, ExchangeConfig, FeedConfigFile, GlobalConfig};
use crate::domain::{FeedTransport, SessionState, SnapshotFetcher};

use super::session::{ExchangeSession, SessionHandle};

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),
    #[error("no adapter registered for exchange: {0}")]
    NoAdapter(String),
}

/// Transport and snapshot source for one exchange
pub struct ExchangeAdapter {
    pub transport: Arc<dyn FeedTransport>,
    pub fetcher: Arc<dyn SnapshotFetcher>,
}

type AdapterFactory = Box<dyn Fn(&ExchangeConfig) -> ExchangeAdapter + Send + Sync>;

/// Build-time map from exchange id to adapter factory
#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<ExchangeId, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for one exchange id, chainable
    pub fn register<F>(mut self, exchange: impl Into<ExchangeId>, factory: F) -> Self
    where
        F: Fn(&ExchangeConfig) -> ExchangeAdapter + Send + Sync + 'static,
    {
        self.factories.insert(exchange.into(), Box::new(factory));
        self
    }

    pub fn contains(&self, exchange: &ExchangeId) -> bool {
        self.factories.contains_key(exchange)
    }

    pub fn registered(&self) -> Vec<ExchangeId> {
        self.factories.keys().cloned().collect()
    }

    fn build(&self, config: &ExchangeConfig) -> Option<ExchangeAdapter> {
        self.factories
            .get(&ExchangeId::new(config.id.as_str()))
            .map(|factory| factory(config))
    }
}

/// Owns one feed session per started exchange plus the shared book
/// registry they publish into.
pub struct ExchangeManager {
    books: BookManager,
    registry: AdapterRegistry,
    global: GlobalConfig,
    exchanges: HashMap<ExchangeId, ExchangeConfig>,
    sessions: Mutex<HashMap<ExchangeId, SessionHandle>>,
}

impl ExchangeManager {
    /// Validates the config; does not start anything yet
    pub fn new(config: FeedConfigFile, registry: AdapterRegistry) -> Result<Self, ConfigError> {
        config.validate()?;
        let exchanges = config
            .exchanges
            .iter()
            .map(|e| (ExchangeId::new(e.id.as_str()), e.clone()))
            .collect();
        Ok(ExchangeManager {
            books: BookManager::default(),
            registry,
            global: config.global,
            exchanges,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Start every enabled exchange with a registered adapter; returns
    /// how many sessions were started
    pub fn start_all(&self) -> usize {
        let mut enabled: Vec<ExchangeId> = self
            .exchanges
            .iter()
            .filter(|(_, config)| config.enabled)
            .map(|(id, _)| id.clone())
            .collect();
        enabled.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        let mut started = 0;
        for id in enabled {
            if !self.registry.contains(&id) {
                tracing::warn!("{} enabled but no adapter registered, skipping", id);
                continue;
            }
            match self.start_exchange(&id) {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("failed to start {}: {}", id, e),
            }
        }
        started
    }

    /// Start one exchange's session. Returns false when it is already
    /// running. Works for disabled exchanges too: the flag only gates
    /// [`start_all`](Self::start_all).
    pub fn start_exchange(&self, id: &ExchangeId) -> Result<bool, ManagerError> {
        let config = self
            .exchanges
            .get(id)
            .ok_or_else(|| ManagerError::UnknownExchange(id.to_string()))?;
        let adapter = self
            .registry
            .build(config)
            .ok_or_else(|| ManagerError::NoAdapter(id.to_string()))?;

        let mut sessions = self.sessions.lock();
        if sessions.contains_key(id) {
            return Ok(false);
        }

        let markets = config
            .markets
            .iter()
            .map(|m| MarketId::new(m.as_str()))
            .collect();
        let session = ExchangeSession::new(
            id.clone(),
            markets,
            adapter.transport,
            adapter.fetcher,
            self.books.clone(),
            config.session_config(&self.global),
        );
        sessions.insert(id.clone(), session.spawn());
        tracing::info!("{} session started", id);
        Ok(true)
    }

    /// Stop one exchange's session and drop its books; returns false
    /// when no session was running
    pub async fn stop_exchange(&self, id: &ExchangeId) -> bool {
        let handle = self.sessions.lock().remove(id);
        match handle {
            Some(handle) => {
                handle.shutdown().await;
                tracing::info!("{} session stopped", id);
                true
            }
            None => false,
        }
    }

    pub async fn shutdown_all(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.shutdown().await;
        }
    }

    /// Exchanges with a running session, in any state
    pub fn running_exchanges(&self) -> Vec<ExchangeId> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Exchanges whose feed is currently open
    pub fn connected_exchanges(&self) -> Vec<ExchangeId> {
        self.sessions
            .lock()
            .iter()
            .filter(|(_, handle)| handle.state().is_open())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn session_state(&self, id: &ExchangeId) -> Option<SessionState> {
        self.sessions.lock().get(id).map(|handle| handle.state())
    }

    pub fn reconnect_count(&self, id: &ExchangeId) -> Option<u64> {
        self.sessions
            .lock()
            .get(id)
            .map(|handle| handle.reconnect_count())
    }

    pub fn subscribe_trades(&self, id: &ExchangeId) -> Option<broadcast::Receiver<TradeBatch>> {
        self.sessions
            .lock()
            .get(id)
            .map(|handle| handle.subscribe_trades())
    }

    pub fn books(&self) -> &BookManager {
        &self.books
    }

    /// Book handle for a market that has a session-created book
    pub fn book(&self, key: &QualifiedMarket) -> Option<SharedBook> {
        self.books.existing_book(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use bookflow_core::{BookLevel, BookSnapshot, FeedMessage};
    use crate::config::FeedTuningJson;
    use crate::domain::{FeedConnection, FeedControl, FetchError, TransportError};

    struct NoopControl;

    #[async_trait]
    impl FeedControl for NoopControl {
        async fn ping(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn subscribe(&self, _markets: &[MarketId]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    /// Always connects; keeps each connection's sender alive so the
    /// feed stays open and silent
    #[derive(Default)]
    struct OpenTransport {
        senders: Mutex<Vec<mpsc::Sender<FeedMessage>>>,
    }

    #[async_trait]
    impl FeedTransport for OpenTransport {
        async fn connect(&self, _markets: &[MarketId]) -> Result<FeedConnection, TransportError> {
            let (tx, rx) = mpsc::channel(8);
            self.senders.lock().push(tx);
            Ok(FeedConnection {
                control: Box::new(NoopControl),
                messages: rx,
            })
        }
    }

    struct OkFetcher;

    #[async_trait]
    impl SnapshotFetcher for OkFetcher {
        async fn fetch(&self, _market: &QualifiedMarket) -> Result<BookSnapshot, FetchError> {
            Ok(BookSnapshot::new(
                vec![BookLevel::new(dec!(100), dec!(1))],
                vec![BookLevel::new(dec!(101), dec!(1))],
                1,
            ))
        }
    }

    fn exchange(id: &str, enabled: bool) -> ExchangeConfig {
        ExchangeConfig {
            id: id.into(),
            name: id.into(),
            enabled,
            ws_url: "wss://example.test/ws".into(),
            rest_url: "https://example.test".into(),
            api_key: String::new(),
            api_secret: String::new(),
            markets: vec!["BTC-EUR".into()],
            tuning: FeedTuningJson::default(),
        }
    }

    fn registry_for(ids: &[&str]) -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        for id in ids {
            registry = registry.register(*id, |_config| ExchangeAdapter {
                transport: Arc::new(OpenTransport::default()),
                fetcher: Arc::new(OkFetcher),
            });
        }
        registry
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let registry = registry_for(&["bitvavo"]);
        assert!(registry.contains(&ExchangeId::new("Bitvavo")));
        assert!(!registry.contains(&ExchangeId::new("kraken")));
        assert_eq!(registry.registered(), vec![ExchangeId::new("bitvavo")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_all_skips_disabled_and_unregistered() {
        let config = FeedConfigFile {
            exchanges: vec![
                exchange("bitvavo", true),
                exchange("kraken", false),
                exchange("binance", true), // enabled but no adapter
            ],
            global: GlobalConfig::default(),
        };
        let manager = ExchangeManager::new(config, registry_for(&["bitvavo", "kraken"])).unwrap();

        assert_eq!(manager.start_all(), 1);
        assert_eq!(
            manager.running_exchanges(),
            vec![ExchangeId::new("bitvavo")]
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            manager.session_state(&ExchangeId::new("bitvavo")),
            Some(SessionState::Open)
        );
        assert_eq!(
            manager.connected_exchanges(),
            vec![ExchangeId::new("bitvavo")]
        );

        manager.shutdown_all().await;
        assert!(manager.running_exchanges().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_create_and_remove_books() {
        let config = FeedConfigFile {
            exchanges: vec![exchange("bitvavo", true)],
            global: GlobalConfig::default(),
        };
        let manager = ExchangeManager::new(config, registry_for(&["bitvavo"])).unwrap();
        let id = ExchangeId::new("bitvavo");
        let key = QualifiedMarket::new("bitvavo", "BTC-EUR");

        manager.start_all();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let book = manager.book(&key).unwrap();
        assert!(book.snapshot_ready());
        assert_eq!(book.best_bid().map(|l| l.rate), Some(dec!(100)));

        assert!(manager.stop_exchange(&id).await);
        assert!(manager.book(&key).is_none());
        assert!(!manager.stop_exchange(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_exchange_errors_and_idempotence() {
        let config = FeedConfigFile {
            exchanges: vec![exchange("bitvavo", true)],
            global: GlobalConfig::default(),
        };
        let manager = ExchangeManager::new(config, registry_for(&[])).unwrap();

        assert!(matches!(
            manager.start_exchange(&ExchangeId::new("kraken")),
            Err(ManagerError::UnknownExchange(_))
        ));
        assert!(matches!(
            manager.start_exchange(&ExchangeId::new("bitvavo")),
            Err(ManagerError::NoAdapter(_))
        ));

        let config = FeedConfigFile {
            exchanges: vec![exchange("bitvavo", true)],
            global: GlobalConfig::default(),
        };
        let manager = ExchangeManager::new(config, registry_for(&["bitvavo"])).unwrap();
        assert!(manager.start_exchange(&ExchangeId::new("bitvavo")).unwrap());
        assert!(!manager.start_exchange(&ExchangeId::new("bitvavo")).unwrap());

        manager.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trade_subscription_through_manager() {
        let config = FeedConfigFile {
            exchanges: vec![exchange("bitvavo", true)],
            global: GlobalConfig::default(),
        };
        let manager = ExchangeManager::new(config, registry_for(&["bitvavo"])).unwrap();
        manager.start_all();

        assert!(
            manager
                .subscribe_trades(&ExchangeId::new("bitvavo"))
                .is_some()
        );
        assert!(manager.subscribe_trades(&ExchangeId::new("kraken")).is_none());

        manager.shutdown_all().await;
    }
}
