use std::collections::HashMap;

use tokio::sync::broadcast;

use bookflow_core::{BookLevel, BookSnapshot, FeedEvent, QualifiedMarket, Side, TradeBatch};

use crate::book::{BookManager, OrderBook};
use crate::domain::SequenceBuffer;

/// Routes decoded feed batches into books and the trade broadcast.
///
/// Each market gets its own [`SequenceBuffer`], so one market's gap
/// never stalls another. Snapshots bypass the buffer: a resync image
/// must not queue behind the very gap it is healing, so it applies
/// immediately and the buffer fast-forwards past it.
///
/// Routing is infallible by contract. Bad input degrades to a logged
/// drop or a book-level no-op, never to an error on the feed path.
pub struct EventRouter {
    books: BookManager,
    sequencers: HashMap<QualifiedMarket, SequenceBuffer<Vec<FeedEvent>>>,
    trades_tx: broadcast::Sender<TradeBatch>,
    max_pending: usize,
}

impl EventRouter {
    pub fn new(books: BookManager, max_pending: usize) -> Self {
        let (trades_tx, _) = broadcast::channel(1024);
        EventRouter {
            books,
            sequencers: HashMap::new(),
            trades_tx,
            max_pending,
        }
    }

    /// Receiver for trade batches across all markets of this router
    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeBatch> {
        self.trades_tx.subscribe()
    }

    /// Sender handle, for wiring subscriptions outside the session task
    pub fn trade_sender(&self) -> broadcast::Sender<TradeBatch> {
        self.trades_tx.clone()
    }

    pub fn books(&self) -> &BookManager {
        &self.books
    }

    /// Feed one decoded batch through the market's sequencer and apply
    /// whatever it releases.
    pub fn route(&mut self, market: &QualifiedMarket, sequence: u64, events: Vec<FeedEvent>) {
        let has_snapshot = events.iter().any(FeedEvent::is_snapshot);
        let sequencer = self
            .sequencers
            .entry(market.clone())
            .or_insert_with(|| SequenceBuffer::new(self.max_pending));

        let released = if has_snapshot {
            // The image supersedes everything parked at or below it
            let mut batches = vec![(sequence, events)];
            batches.extend(sequencer.fast_forward(sequence));
            batches
        } else {
            sequencer.push(sequence, events)
        };

        for (seq, batch) in released {
            self.apply_batch(market, seq, batch);
        }
    }

    /// Install a fetched snapshot and fast-forward the market's
    /// sequencer past it.
    pub fn apply_snapshot(&mut self, market: &QualifiedMarket, snapshot: &BookSnapshot) {
        self.books.book(market).apply_snapshot(snapshot);

        let sequencer = self
            .sequencers
            .entry(market.clone())
            .or_insert_with(|| SequenceBuffer::new(self.max_pending));
        let released = sequencer.fast_forward(snapshot.sequence);
        for (seq, batch) in released {
            self.apply_batch(market, seq, batch);
        }
    }

    /// Forget one market's stream position, for resubscription
    pub fn reset_market(&mut self, market: &QualifiedMarket) {
        if let Some(sequencer) = self.sequencers.get_mut(market) {
            sequencer.reset();
        }
    }

    /// Forget every stream position, for reconnection. Books are left
    /// to the session, which clears them separately.
    pub fn reset_all(&mut self) {
        self.sequencers.clear();
    }

    fn apply_batch(&mut self, market: &QualifiedMarket, sequence: u64, events: Vec<FeedEvent>) {
        let book = self.books.book(market);
        let mut trades = Vec::new();

        // One write lock per batch so readers never observe a
        // half-applied replace-all
        book.update(|book| {
            for event in events {
                match event {
                    FeedEvent::Trade(trade) => trades.push(trade),
                    FeedEvent::Add { side, level } => book.add_order(side, level, sequence),
                    FeedEvent::Remove { side, level } => book.remove_order(side, level, sequence),
                    FeedEvent::Snapshot(snapshot) => book.apply_snapshot(&snapshot),
                    FeedEvent::ReplaceAll { bids, asks } => {
                        Self::apply_replace_all(book, bids, asks, sequence)
                    }
                }
            }
            if let Some(last) = trades.last() {
                book.set_last_trade_rate(last.rate);
            }
        });

        if !trades.is_empty() {
            // No receivers is fine, send only fails when nobody listens
            let _ = self.trades_tx.send(TradeBatch::new(market.clone(), trades));
        }
    }

    fn apply_replace_all(
        book: &mut OrderBook,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        sequence: u64,
    ) {
        // A full image doubles as the snapshot for an uninitialized book
        if !book.snapshot_ready() {
            book.apply_snapshot(&BookSnapshot::new(bids, asks, sequence));
            return;
        }

        book.mark_levels();
        for level in bids {
            book.add_order(Side::Buy, level, sequence);
        }
        for level in asks {
            book.add_order(Side::Sell, level, sequence);
        }
        book.remove_marked();
    }
}
