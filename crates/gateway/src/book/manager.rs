use std::ops::RangeBounds;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use bookflow_core::{BookLevel, BookSnapshot, ExchangeId, QualifiedMarket, Side};

use super::order_book::{BookConfig, OrderBook};

/// Multi-market order book registry with exchange-qualified keys.
/// Thread-safe, can be cloned and shared across tasks; per-market
/// sharding so different markets don't block each other.
#[derive(Clone)]
pub struct BookManager {
    books: Arc<DashMap<QualifiedMarket, Arc<RwLock<OrderBook>>>>,
    config: BookConfig,
}

impl BookManager {
    pub fn new(config: BookConfig) -> Self {
        BookManager {
            books: Arc::new(DashMap::new()),
            config,
        }
    }

    fn get_or_create(&self, key: &QualifiedMarket) -> Arc<RwLock<OrderBook>> {
        // Fast path: already present
        if let Some(entry) = self.books.get(key) {
            return Arc::clone(&entry);
        }

        self.books
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(OrderBook::new(self.config.clone()))))
            .clone()
    }

    /// Get a handle to one market's book, creating it if needed
    pub fn book(&self, key: &QualifiedMarket) -> SharedBook {
        SharedBook {
            book: self.get_or_create(key),
            key: key.clone(),
        }
    }

    /// Like [`book`](Self::book), but a book created by this call uses
    /// `config` instead of the manager default. Sessions pre-create
    /// their books with per-exchange tuning; an existing book keeps the
    /// config it was created with.
    pub fn book_with_config(&self, key: &QualifiedMarket, config: BookConfig) -> SharedBook {
        let book = self
            .books
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(OrderBook::new(config))))
            .clone();
        SharedBook {
            book,
            key: key.clone(),
        }
    }

    /// Get a handle only if the book already exists
    pub fn existing_book(&self, key: &QualifiedMarket) -> Option<SharedBook> {
        self.books.get(key).map(|entry| SharedBook {
            book: Arc::clone(&entry),
            key: key.clone(),
        })
    }

    /// All markets with a book, across exchanges
    pub fn markets(&self) -> Vec<QualifiedMarket> {
        self.books.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Markets belonging to one exchange
    pub fn markets_for(&self, exchange: &ExchangeId) -> Vec<QualifiedMarket> {
        self.books
            .iter()
            .filter(|entry| &entry.key().exchange == exchange)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Empty every book of an exchange without destroying them.
    /// Handles stay usable and a fresh snapshot re-initializes.
    pub fn clear_exchange(&self, exchange: &ExchangeId) {
        for entry in self.books.iter() {
            if &entry.key().exchange == exchange {
                entry.value().write().clear();
            }
        }
    }

    /// Drop every book of an exchange, for session shutdown
    pub fn remove_exchange(&self, exchange: &ExchangeId) {
        self.books.retain(|key, _| &key.exchange != exchange);
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

impl Default for BookManager {
    fn default() -> Self {
        Self::new(BookConfig::default())
    }
}

/// Handle to a single order book within the manager
#[derive(Clone)]
pub struct SharedBook {
    book: Arc<RwLock<OrderBook>>,
    key: QualifiedMarket,
}

impl SharedBook {
    pub fn market(&self) -> &QualifiedMarket {
        &self.key
    }

    pub fn exchange(&self) -> &ExchangeId {
        &self.key.exchange
    }

    /// Run a closure under one write lock, for multi-step mutations
    /// that readers must not observe half-applied (replace-all passes,
    /// whole-batch application).
    pub fn update<R>(&self, f: impl FnOnce(&mut OrderBook) -> R) -> R {
        f(&mut self.book.write())
    }

    pub fn apply_snapshot(&self, snapshot: &BookSnapshot) {
        self.book.write().apply_snapshot(snapshot);
    }

    pub fn clear(&self) {
        self.book.write().clear();
    }

    pub fn set_last_trade_rate(&self, rate: Decimal) {
        self.book.write().set_last_trade_rate(rate);
    }

    // ---- queries (owned results, never borrowed book state) ----

    pub fn best_bid(&self) -> Option<BookLevel> {
        self.book.read().best_bid()
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.book.read().best_ask()
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        self.book.read().mid_price()
    }

    pub fn spread(&self) -> Option<Decimal> {
        self.book.read().spread()
    }

    pub fn bid_count(&self) -> usize {
        self.book.read().bid_count()
    }

    pub fn ask_count(&self) -> usize {
        self.book.read().ask_count()
    }

    pub fn amount_at(&self, side: Side, rate: Decimal) -> Decimal {
        self.book.read().amount_at(side, rate)
    }

    pub fn bid_amount_in<R: RangeBounds<Decimal>>(&self, range: R) -> Decimal {
        self.book.read().bid_amount_in(range)
    }

    pub fn ask_amount_in<R: RangeBounds<Decimal>>(&self, range: R) -> Decimal {
        self.book.read().ask_amount_in(range)
    }

    pub fn total_bid_amount(&self) -> Decimal {
        self.book.read().total_bid_amount()
    }

    pub fn total_ask_amount(&self) -> Decimal {
        self.book.read().total_ask_amount()
    }

    pub fn bids_to_fill(&self, amount: Decimal) -> Vec<BookLevel> {
        self.book.read().bids_to_fill(amount)
    }

    pub fn asks_to_fill(&self, amount: Decimal) -> Vec<BookLevel> {
        self.book.read().asks_to_fill(amount)
    }

    pub fn raise_amount(&self, percent: Decimal) -> Decimal {
        self.book.read().raise_amount(percent)
    }

    pub fn lower_amount(&self, percent: Decimal) -> Decimal {
        self.book.read().lower_amount(percent)
    }

    pub fn top_bids(&self, n: usize) -> Vec<BookLevel> {
        self.book.read().top_bids(n)
    }

    pub fn top_asks(&self, n: usize) -> Vec<BookLevel> {
        self.book.read().top_asks(n)
    }

    pub fn last_trade_rate(&self) -> Option<Decimal> {
        self.book.read().last_trade_rate()
    }

    pub fn sequence(&self) -> u64 {
        self.book.read().sequence()
    }

    pub fn snapshot_ready(&self) -> bool {
        self.book.read().snapshot_ready()
    }

    pub fn is_valid(&self) -> bool {
        self.book.read().is_valid()
    }
}
