use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{TimeZone, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval, interval_at, sleep, sleep_until};

use bookflow_core::{
    BookSnapshot, ExchangeId, FeedMessage, MarketId, QualifiedMarket, Timestamp, TradeBatch,
};

use crate::book::{BookManager, SharedBook};
use crate::config::SessionConfig;
use crate::domain::{FeedConnection, FeedTransport, FetchError, SessionState, SnapshotFetcher};

use super::router::EventRouter;

/// One exchange's feed session, ready to spawn.
///
/// The spawned task owns the connection lifecycle: connect, keepalive,
/// idle detection, validity sweeps, snapshot acquisition, and the fixed
/// reconnect delay. Nothing on this path is ever fatal; every failure
/// funnels into clear-and-reconnect.
pub struct ExchangeSession {
    exchange: ExchangeId,
    markets: Vec<MarketId>,
    transport: Arc<dyn FeedTransport>,
    fetcher: Arc<dyn SnapshotFetcher>,
    books: BookManager,
    config: SessionConfig,
}

impl ExchangeSession {
    pub fn new(
        exchange: ExchangeId,
        markets: Vec<MarketId>,
        transport: Arc<dyn FeedTransport>,
        fetcher: Arc<dyn SnapshotFetcher>,
        books: BookManager,
        config: SessionConfig,
    ) -> Self {
        ExchangeSession {
            exchange,
            markets,
            transport,
            fetcher,
            books,
            config,
        }
    }

    /// Start the session task and return its observation handle
    pub fn spawn(self) -> SessionHandle {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Books exist up front with this session's tuning, so readers
        // and the router always find them configured
        for market in &self.markets {
            self.books.book_with_config(
                &QualifiedMarket {
                    exchange: self.exchange.clone(),
                    market: market.clone(),
                },
                self.config.book.clone(),
            );
        }

        let router = EventRouter::new(self.books.clone(), self.config.max_pending_values);
        let trades_tx = router.trade_sender();
        let last_message_ms = Arc::new(AtomicI64::new(0));
        let reconnects = Arc::new(AtomicU64::new(0));

        let worker = SessionWorker {
            exchange: self.exchange.clone(),
            markets: self.markets,
            transport: self.transport,
            fetcher: self.fetcher,
            books: self.books.clone(),
            config: self.config,
            router,
            snapshot_queue: VecDeque::new(),
            in_queue: HashSet::new(),
            state_tx,
            last_message_ms: Arc::clone(&last_message_ms),
            last_message_instant: Instant::now(),
            reconnects: Arc::clone(&reconnects),
        };
        let join = tokio::spawn(worker.run(shutdown_rx));

        SessionHandle {
            exchange: self.exchange,
            books: self.books,
            state_rx,
            trades_tx,
            last_message_ms,
            reconnects,
            shutdown_tx,
            join,
        }
    }
}

/// Observation and control handle for a spawned session.
///
/// Dropping the handle shuts the session down.
pub struct SessionHandle {
    exchange: ExchangeId,
    books: BookManager,
    state_rx: watch::Receiver<SessionState>,
    trades_tx: broadcast::Sender<TradeBatch>,
    last_message_ms: Arc<AtomicI64>,
    reconnects: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SessionHandle {
    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch stream of lifecycle transitions
    pub fn state_stream(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Receiver for this session's trade batches
    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeBatch> {
        self.trades_tx.subscribe()
    }

    pub fn books(&self) -> &BookManager {
        &self.books
    }

    /// Book handle for one of this session's markets
    pub fn book(&self, market: impl Into<MarketId>) -> SharedBook {
        self.books.book(&QualifiedMarket {
            exchange: self.exchange.clone(),
            market: market.into(),
        })
    }

    /// Wall-clock time of the last inbound feed message
    pub fn last_message_at(&self) -> Option<Timestamp> {
        let ms = self.last_message_ms.load(Ordering::Relaxed);
        if ms <= 0 {
            return None;
        }
        Utc.timestamp_millis_opt(ms).single()
    }

    /// Reconnect attempts scheduled so far (0 while the first
    /// connection holds)
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Stop the session and tear down its books
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

enum ExitReason {
    Shutdown,
    Idle,
    TransportClosed,
    InvalidBook,
}

struct SessionWorker {
    exchange: ExchangeId,
    markets: Vec<MarketId>,
    transport: Arc<dyn FeedTransport>,
    fetcher: Arc<dyn SnapshotFetcher>,
    books: BookManager,
    config: SessionConfig,
    router: EventRouter,
    snapshot_queue: VecDeque<QualifiedMarket>,
    in_queue: HashSet<QualifiedMarket>,
    state_tx: watch::Sender<SessionState>,
    last_message_ms: Arc<AtomicI64>,
    last_message_instant: Instant,
    reconnects: Arc<AtomicU64>,
}

impl SessionWorker {
    async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() || shutdown_rx.has_changed().is_err() {
                break;
            }

            self.set_state(SessionState::Connecting);
            tracing::info!("{} connecting", self.exchange);

            let connected = tokio::select! {
                result = self.transport.connect(&self.markets) => result,
                _ = shutdown_rx.changed() => break,
            };

            match connected {
                Ok(connection) => {
                    let reason = self.run_open(connection, &mut shutdown_rx).await;

                    // Books are cleared, never destroyed: handles held by
                    // consumers stay valid and refill after resync
                    self.router.reset_all();
                    self.books.clear_exchange(&self.exchange);
                    self.set_state(SessionState::Disconnected);

                    if matches!(reason, ExitReason::Shutdown) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("{} connect failed: {}", self.exchange, e);
                    self.set_state(SessionState::Disconnected);
                }
            }

            self.reconnects.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                "{} reconnecting in {:?}",
                self.exchange,
                self.config.reconnect_delay
            );
            tokio::select! {
                _ = sleep(self.config.reconnect_delay) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        self.set_state(SessionState::Disconnected);
        self.books.remove_exchange(&self.exchange);
        tracing::info!("{} session stopped", self.exchange);
    }

    async fn run_open(
        &mut self,
        connection: FeedConnection,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> ExitReason {
        let FeedConnection {
            control,
            mut messages,
        } = connection;

        self.set_state(SessionState::Open);
        self.touch_last_message();
        tracing::info!("{} feed open, requesting snapshots", self.exchange);

        // Fresh stream: forget old positions and refetch every book
        self.router.reset_all();
        self.snapshot_queue.clear();
        self.in_queue.clear();
        for market in self.markets.clone() {
            self.queue_snapshot(QualifiedMarket {
                exchange: self.exchange.clone(),
                market,
            });
        }

        let mut keepalive = interval_at(
            Instant::now() + self.config.keepalive_interval,
            self.config.keepalive_interval,
        );
        let mut validity_tick = interval_at(
            Instant::now() + self.config.validity_check_interval,
            self.config.validity_check_interval,
        );
        let mut snapshot_tick = interval(self.config.snapshot_interval);

        // Sender kept alive here so the receiver never reports closed;
        // in-flight fetches from a previous connection sent into their
        // own (dropped) channel and can never leak into this one
        let (snap_tx, mut snap_rx) =
            mpsc::channel::<(QualifiedMarket, Result<BookSnapshot, FetchError>)>(16);

        loop {
            let idle_deadline = self.last_message_instant + self.config.idle_timeout;

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    control.close().await;
                    return ExitReason::Shutdown;
                }
                maybe_message = messages.recv() => {
                    match maybe_message {
                        Some(message) => {
                            self.touch_last_message();
                            if !self.handle_message(message) {
                                control.close().await;
                                return ExitReason::TransportClosed;
                            }
                        }
                        None => {
                            tracing::warn!("{} feed channel closed", self.exchange);
                            return ExitReason::TransportClosed;
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if let Err(e) = control.ping().await {
                        tracing::warn!("{} keepalive failed: {}", self.exchange, e);
                        control.close().await;
                        return ExitReason::TransportClosed;
                    }
                }
                _ = sleep_until(idle_deadline) => {
                    tracing::warn!(
                        "{} idle for {:?}, forcing reconnect",
                        self.exchange,
                        self.config.idle_timeout
                    );
                    control.close().await;
                    return ExitReason::Idle;
                }
                _ = validity_tick.tick() => {
                    if let Some(market) = self.first_invalid_book() {
                        tracing::warn!("{} book invalid, forcing reconnect", market);
                        control.close().await;
                        return ExitReason::InvalidBook;
                    }
                }
                _ = snapshot_tick.tick() => {
                    self.spawn_next_fetch(&snap_tx);
                }
                Some((market, result)) = snap_rx.recv() => {
                    self.handle_snapshot_result(market, result);
                }
            }
        }
    }

    /// Returns false when the connection is gone
    fn handle_message(&mut self, message: FeedMessage) -> bool {
        match message {
            FeedMessage::Events {
                market,
                sequence,
                events,
            } => {
                if market.exchange != self.exchange || !self.markets.contains(&market.market) {
                    tracing::debug!("ignoring events for untracked market {}", market);
                    return true;
                }
                self.router.route(&market, sequence, events);
                true
            }
            FeedMessage::Raw(text) => {
                tracing::debug!("{} unhandled frame: {}", self.exchange, text);
                true
            }
            FeedMessage::Error(e) => {
                // Transport reports fatal errors by closing the channel
                tracing::error!("{} feed error: {}", self.exchange, e);
                true
            }
            FeedMessage::Disconnected => {
                tracing::warn!("{} feed disconnected", self.exchange);
                false
            }
        }
    }

    fn spawn_next_fetch(
        &mut self,
        snap_tx: &mpsc::Sender<(QualifiedMarket, Result<BookSnapshot, FetchError>)>,
    ) {
        let Some(market) = self.next_snapshot_market() else {
            return;
        };
        tracing::debug!("fetching snapshot for {}", market);
        let fetcher = Arc::clone(&self.fetcher);
        let tx = snap_tx.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch(&market).await;
            let _ = tx.send((market, result)).await;
        });
    }

    fn handle_snapshot_result(
        &mut self,
        market: QualifiedMarket,
        result: Result<BookSnapshot, FetchError>,
    ) {
        match result {
            Ok(snapshot) => {
                tracing::info!("{} synced at sequence {}", market, snapshot.sequence);
                self.router.apply_snapshot(&market, &snapshot);
            }
            Err(e) => {
                tracing::error!("snapshot fetch for {} failed: {}", market, e);
                self.queue_snapshot(market);
            }
        }
    }

    fn first_invalid_book(&self) -> Option<QualifiedMarket> {
        self.markets
            .iter()
            .map(|market| QualifiedMarket {
                exchange: self.exchange.clone(),
                market: market.clone(),
            })
            .find(|key| {
                self.books
                    .existing_book(key)
                    .is_some_and(|book| !book.is_valid())
            })
    }

    fn queue_snapshot(&mut self, market: QualifiedMarket) {
        if self.in_queue.insert(market.clone()) {
            self.snapshot_queue.push_back(market);
        }
    }

    fn next_snapshot_market(&mut self) -> Option<QualifiedMarket> {
        let market = self.snapshot_queue.pop_front()?;
        self.in_queue.remove(&market);
        Some(market)
    }

    fn touch_last_message(&mut self) {
        self.last_message_instant = Instant::now();
        self.last_message_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bookflow_core::{BookLevel, FeedEvent, Side, Trade};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::domain::{FeedControl, TransportError};

    struct ScriptedControl {
        pings: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FeedControl for ScriptedControl {
        async fn ping(&self) -> Result<(), TransportError> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn subscribe(&self, _markets: &[MarketId]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    /// Transport that hands out pre-scripted connections in order;
    /// `None` entries simulate a failed connect attempt.
    struct ScriptedTransport {
        connections: Mutex<VecDeque<Option<mpsc::Receiver<FeedMessage>>>>,
        connects: AtomicUsize,
        pings: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Option<mpsc::Receiver<FeedMessage>>>) -> Arc<Self> {
            Arc::new(ScriptedTransport {
                connections: Mutex::new(scripts.into()),
                connects: AtomicUsize::new(0),
                pings: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    #[async_trait]
    impl FeedTransport for ScriptedTransport {
        async fn connect(&self, _markets: &[MarketId]) -> Result<FeedConnection, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.connections.lock().pop_front() {
                Some(Some(rx)) => Ok(FeedConnection {
                    control: Box::new(ScriptedControl {
                        pings: Arc::clone(&self.pings),
                    }),
                    messages: rx,
                }),
                Some(None) => Err(TransportError::Connect("scripted failure".into())),
                None => Err(TransportError::Connect("no more connections".into())),
            }
        }
    }

    struct StaticFetcher {
        snapshot: Option<BookSnapshot>,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        fn ok(snapshot: BookSnapshot) -> Arc<Self> {
            Arc::new(StaticFetcher {
                snapshot: Some(snapshot),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(StaticFetcher {
                snapshot: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SnapshotFetcher for StaticFetcher {
        async fn fetch(&self, _market: &QualifiedMarket) -> Result<BookSnapshot, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.snapshot {
                Some(snapshot) => Ok(snapshot.clone()),
                None => Err(FetchError::Network("scripted failure".into())),
            }
        }
    }

    fn test_snapshot() -> BookSnapshot {
        BookSnapshot::new(
            vec![BookLevel::new(dec!(100), dec!(1))],
            vec![BookLevel::new(dec!(101), dec!(1))],
            10,
        )
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            reconnect_delay: Duration::from_millis(2500),
            idle_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(15),
            validity_check_interval: Duration::from_secs(5),
            snapshot_interval: Duration::from_millis(250),
            max_pending_values: 100,
            book: crate::book::BookConfig::default(),
        }
    }

    fn session(
        transport: Arc<ScriptedTransport>,
        fetcher: Arc<StaticFetcher>,
        config: SessionConfig,
    ) -> (ExchangeSession, BookManager) {
        let books = BookManager::new(config.book.clone());
        let session = ExchangeSession::new(
            ExchangeId::new("bitvavo"),
            vec![MarketId::new("BTC-EUR")],
            transport,
            fetcher,
            books.clone(),
            config,
        );
        (session, books)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_session_installs_snapshot_and_routes() {
        let (feed_tx, feed_rx) = mpsc::channel(64);
        let transport = ScriptedTransport::new(vec![Some(feed_rx)]);
        let fetcher = StaticFetcher::ok(test_snapshot());
        let (session, _books) = session(Arc::clone(&transport), Arc::clone(&fetcher), test_config());

        let handle = session.spawn();
        let mut trades = handle.subscribe_trades();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state(), SessionState::Open);
        assert!(handle.book("BTC-EUR").snapshot_ready());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // Stream flows through the router into books and trade fan-out
        let market = QualifiedMarket::new("bitvavo", "BTC-EUR");
        feed_tx
            .send(FeedMessage::Events {
                market: market.clone(),
                sequence: 11,
                events: vec![
                    FeedEvent::Add {
                        side: Side::Buy,
                        level: BookLevel::new(dec!(99), dec!(2)),
                    },
                    FeedEvent::Trade(Trade::new(1, dec!(100.5), dec!(0.1), Side::Buy, Utc::now())),
                ],
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handle.book("BTC-EUR").amount_at(Side::Buy, dec!(99)), dec!(2));
        assert_eq!(trades.try_recv().unwrap().trades.len(), 1);
        assert!(handle.last_message_at().is_some());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_reconnects_and_resyncs() {
        let (_feed_tx1, feed_rx1) = mpsc::channel(8);
        let (feed_tx2, feed_rx2) = mpsc::channel(8);
        let transport = ScriptedTransport::new(vec![Some(feed_rx1), Some(feed_rx2)]);
        let fetcher = StaticFetcher::ok(test_snapshot());
        let (session, _books) = session(Arc::clone(&transport), Arc::clone(&fetcher), test_config());

        let handle = session.spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state(), SessionState::Open);

        // Silence past the idle timeout plus the reconnect delay brings
        // up the second scripted connection with a fresh snapshot
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
        assert!(handle.reconnect_count() >= 1);
        assert_eq!(handle.state(), SessionState::Open);
        assert!(fetcher.calls.load(Ordering::SeqCst) >= 2);
        assert!(handle.book("BTC-EUR").snapshot_ready());

        drop(feed_tx2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_books_until_resync() {
        let (feed_tx, feed_rx) = mpsc::channel(8);
        // Single scripted connection: every retry after it fails
        let transport = ScriptedTransport::new(vec![Some(feed_rx)]);
        let fetcher = StaticFetcher::ok(test_snapshot());
        let (session, _books) = session(transport, fetcher, test_config());

        let handle = session.spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.book("BTC-EUR").snapshot_ready());

        feed_tx.send(FeedMessage::Disconnected).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Cleared, not destroyed: the handle still works, the book is empty
        assert!(!handle.book("BTC-EUR").snapshot_ready());
        assert_eq!(handle.book("BTC-EUR").bid_count(), 0);
        assert_ne!(handle.state(), SessionState::Open);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_retry_forever() {
        let (_feed_tx, feed_rx) = mpsc::channel(8);
        // Two failures before a connection succeeds
        let transport = ScriptedTransport::new(vec![None, None, Some(feed_rx)]);
        let fetcher = StaticFetcher::ok(test_snapshot());
        let (session, _books) = session(Arc::clone(&transport), fetcher, test_config());

        let handle = session.spawn();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.connects.load(Ordering::SeqCst), 3);
        assert_eq!(handle.state(), SessionState::Open);
        assert_eq!(handle.reconnect_count(), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_pings_flow() {
        let (_feed_tx, feed_rx) = mpsc::channel(8);
        let transport = ScriptedTransport::new(vec![Some(feed_rx)]);
        let fetcher = StaticFetcher::ok(test_snapshot());
        let (session, _books) = session(Arc::clone(&transport), fetcher, test_config());

        let handle = session.spawn();
        // A keepalive interval passes well inside the idle timeout
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(transport.pings.load(Ordering::SeqCst) >= 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_destroys_books() {
        let (_feed_tx, feed_rx) = mpsc::channel(8);
        let transport = ScriptedTransport::new(vec![Some(feed_rx)]);
        let fetcher = StaticFetcher::ok(test_snapshot());
        let (session, books) = session(transport, fetcher, test_config());

        let handle = session.spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(books.len(), 1);

        handle.shutdown().await;
        // Subscription over: books removed, not merely cleared
        assert!(books.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_fetcher_requeues_snapshots() {
        let (_feed_tx, feed_rx) = mpsc::channel(8);
        let transport = ScriptedTransport::new(vec![Some(feed_rx)]);
        let fetcher = StaticFetcher::failing();
        let (session, _books) = session(transport, Arc::clone(&fetcher), test_config());

        let handle = session.spawn();
        tokio::time::sleep(Duration::from_secs(3)).await;

        // Failed fetches requeue and retry on the snapshot ticker
        assert!(fetcher.calls.load(Ordering::SeqCst) >= 3);
        assert!(!handle.book("BTC-EUR").snapshot_ready());

        handle.shutdown().await;
    }
}
