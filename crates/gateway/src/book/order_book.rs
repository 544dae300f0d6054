use std::collections::{BTreeMap, VecDeque};
use std::ops::RangeBounds;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use bookflow_core::{BookLevel, BookSnapshot, Side, Timestamp};

/// Tuning knobs for validity checks and pre-snapshot buffering
#[derive(Debug, Clone)]
pub struct BookConfig {
    /// Grace period after creation or clear during which the book
    /// reports valid while still filling
    pub warmup: Duration,
    /// How long a book stays valid after it was last fully populated
    pub staleness: Duration,
    /// Bound on deltas queued while waiting for the snapshot
    pub max_queued_deltas: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        BookConfig {
            warmup: Duration::from_secs(10),
            staleness: Duration::from_secs(60),
            max_queued_deltas: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LevelEntry {
    amount: Decimal,
    /// Pending removal during a replace-all pass
    marked: bool,
}

#[derive(Debug, Clone, Copy)]
enum DeltaKind {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy)]
struct QueuedDelta {
    kind: DeltaKind,
    side: Side,
    level: BookLevel,
    sequence: u64,
}

/// In-memory order book for one market.
///
/// Deltas arriving before the snapshot queue up and replay once it
/// lands; deltas at or below the snapshot sequence are discarded as
/// already included. Mutation is single-writer (one session task),
/// shared read access goes through [`super::BookManager`].
pub struct OrderBook {
    bids: BTreeMap<Decimal, LevelEntry>,
    asks: BTreeMap<Decimal, LevelEntry>,
    queued: VecDeque<QueuedDelta>,
    snapshot_ready: bool,
    sequence: u64,
    last_trade_rate: Option<Decimal>,
    reset_at: Timestamp,
    last_full_at: Option<Timestamp>,
    config: BookConfig,
}

impl OrderBook {
    pub fn new(config: BookConfig) -> Self {
        OrderBook {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            queued: VecDeque::new(),
            snapshot_ready: false,
            sequence: 0,
            last_trade_rate: None,
            reset_at: Utc::now(),
            last_full_at: None,
            config,
        }
    }

    /// Install a full book image and replay queued deltas newer than it.
    ///
    /// At most one snapshot installs per book lifetime (until `clear`);
    /// repeats are ignored, so applying the same snapshot twice is a
    /// no-op.
    pub fn apply_snapshot(&mut self, snapshot: &BookSnapshot) {
        if self.snapshot_ready {
            tracing::debug!(
                "snapshot at sequence {} ignored, book already initialized",
                snapshot.sequence
            );
            return;
        }

        self.bids.clear();
        self.asks.clear();
        for level in &snapshot.bids {
            if level.rate > Decimal::ZERO && level.amount > Decimal::ZERO {
                self.bids.insert(level.rate, LevelEntry {
                    amount: level.amount,
                    marked: false,
                });
            }
        }
        for level in &snapshot.asks {
            if level.rate > Decimal::ZERO && level.amount > Decimal::ZERO {
                self.asks.insert(level.rate, LevelEntry {
                    amount: level.amount,
                    marked: false,
                });
            }
        }
        self.sequence = snapshot.sequence;
        self.snapshot_ready = true;

        // Replay what the stream delivered while the snapshot was in
        // flight; anything at or below its sequence is already included
        let queued = std::mem::take(&mut self.queued);
        let mut replayed = 0usize;
        for delta in queued {
            if delta.sequence <= snapshot.sequence {
                continue;
            }
            match delta.kind {
                DeltaKind::Add => self.apply_add(delta.side, delta.level, delta.sequence),
                DeltaKind::Remove => self.apply_remove(delta.side, delta.level, delta.sequence),
            }
            replayed += 1;
        }
        if replayed > 0 {
            tracing::debug!(
                "replayed {} queued deltas on top of snapshot {}",
                replayed,
                snapshot.sequence
            );
        }
        self.touch_validity();
    }

    /// Add liquidity at a price level (additive on an existing rate).
    /// Queued until the snapshot arrives.
    pub fn add_order(&mut self, side: Side, level: BookLevel, sequence: u64) {
        if level.rate <= Decimal::ZERO {
            tracing::warn!("rejecting add with non-positive rate {}", level.rate);
            return;
        }
        if !self.snapshot_ready {
            self.enqueue(QueuedDelta {
                kind: DeltaKind::Add,
                side,
                level,
                sequence,
            });
            return;
        }
        self.apply_add(side, level, sequence);
        self.touch_validity();
    }

    /// Remove liquidity at a price level; the level disappears once its
    /// amount reaches zero. Queued until the snapshot arrives.
    pub fn remove_order(&mut self, side: Side, level: BookLevel, sequence: u64) {
        if !self.snapshot_ready {
            self.enqueue(QueuedDelta {
                kind: DeltaKind::Remove,
                side,
                level,
                sequence,
            });
            return;
        }
        self.apply_remove(side, level, sequence);
        self.touch_validity();
    }

    /// First phase of replace-all: flag every level for removal
    pub fn mark_levels(&mut self) {
        for entry in self.bids.values_mut().chain(self.asks.values_mut()) {
            entry.marked = true;
        }
    }

    /// Final phase of replace-all: drop levels no add re-confirmed
    pub fn remove_marked(&mut self) {
        self.bids.retain(|_, entry| !entry.marked);
        self.asks.retain(|_, entry| !entry.marked);
        self.touch_validity();
    }

    fn apply_add(&mut self, side: Side, level: BookLevel, sequence: u64) {
        let book_side = self.side_mut(side);
        let entry = book_side.entry(level.rate).or_default();
        entry.amount += level.amount;
        entry.marked = false;
        if entry.amount <= Decimal::ZERO {
            book_side.remove(&level.rate);
        }
        self.note_sequence(sequence);
    }

    fn apply_remove(&mut self, side: Side, level: BookLevel, sequence: u64) {
        let book_side = self.side_mut(side);
        match book_side.get_mut(&level.rate) {
            Some(entry) => {
                entry.amount -= level.amount;
                if entry.amount <= Decimal::ZERO {
                    book_side.remove(&level.rate);
                }
            }
            None => {
                tracing::trace!("remove at absent rate {}, ignoring", level.rate);
            }
        }
        self.note_sequence(sequence);
    }

    fn enqueue(&mut self, delta: QueuedDelta) {
        if self.queued.len() >= self.config.max_queued_deltas {
            tracing::warn!(
                "pre-snapshot queue full ({} deltas), dropping sequence {}",
                self.queued.len(),
                delta.sequence
            );
            return;
        }
        self.queued.push_back(delta);
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, LevelEntry> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn side_ref(&self, side: Side) -> &BTreeMap<Decimal, LevelEntry> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn note_sequence(&mut self, sequence: u64) {
        self.sequence = self.sequence.max(sequence);
    }

    fn touch_validity(&mut self) {
        if self.is_populated() {
            self.last_full_at = Some(Utc::now());
        }
    }

    fn is_populated(&self) -> bool {
        !self.bids.is_empty()
            && self
                .asks
                .iter()
                .next()
                .is_some_and(|(rate, _)| *rate > Decimal::ZERO)
    }

    /// Whether the book can be trusted right now.
    ///
    /// A populated book is always valid. An unpopulated one is given
    /// the benefit of the doubt during the warmup window after
    /// creation/clear, and for the staleness window after it was last
    /// fully populated. Beyond that it is dead and the session should
    /// resynchronize.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Deterministic variant of [`is_valid`](Self::is_valid)
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        if self.is_populated() {
            return true;
        }
        let warmup = chrono::Duration::from_std(self.config.warmup).unwrap_or_default();
        if now - self.reset_at < warmup {
            return true;
        }
        let staleness = chrono::Duration::from_std(self.config.staleness).unwrap_or_default();
        match self.last_full_at {
            Some(full_at) => now - full_at < staleness,
            None => false,
        }
    }

    /// Empty the book for resynchronization. The object survives and a
    /// new snapshot may install; the last trade rate describes the
    /// market rather than the connection and is kept.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.queued.clear();
        self.snapshot_ready = false;
        self.sequence = 0;
        self.reset_at = Utc::now();
        self.last_full_at = None;
    }

    // ---- queries ----

    /// Highest buy level
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(rate, entry)| BookLevel::new(*rate, entry.amount))
    }

    /// Lowest sell level
    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks
            .iter()
            .next()
            .map(|(rate, entry)| BookLevel::new(*rate, entry.amount))
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        let best_bid = self.bids.iter().next_back()?.0;
        let best_ask = self.asks.iter().next()?.0;
        Some((*best_bid + *best_ask) / Decimal::TWO)
    }

    pub fn spread(&self) -> Option<Decimal> {
        let best_bid = self.bids.iter().next_back()?.0;
        let best_ask = self.asks.iter().next()?.0;
        Some(*best_ask - *best_bid)
    }

    pub fn bid_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_count(&self) -> usize {
        self.asks.len()
    }

    /// Amount resting at an exact rate, zero when absent
    pub fn amount_at(&self, side: Side, rate: Decimal) -> Decimal {
        self.side_ref(side)
            .get(&rate)
            .map(|entry| entry.amount)
            .unwrap_or(Decimal::ZERO)
    }

    /// Total bid amount within a rate range (`..` for the whole side)
    pub fn bid_amount_in<R: RangeBounds<Decimal>>(&self, range: R) -> Decimal {
        self.bids.range(range).map(|(_, entry)| entry.amount).sum()
    }

    /// Total ask amount within a rate range (`..` for the whole side)
    pub fn ask_amount_in<R: RangeBounds<Decimal>>(&self, range: R) -> Decimal {
        self.asks.range(range).map(|(_, entry)| entry.amount).sum()
    }

    pub fn total_bid_amount(&self) -> Decimal {
        self.bid_amount_in(..)
    }

    pub fn total_ask_amount(&self) -> Decimal {
        self.ask_amount_in(..)
    }

    /// Best-first bid levels until their amounts cover `amount`.
    /// Returns the whole side if depth runs out first.
    pub fn bids_to_fill(&self, amount: Decimal) -> Vec<BookLevel> {
        Self::levels_to_fill(
            self.bids
                .iter()
                .rev()
                .map(|(rate, entry)| BookLevel::new(*rate, entry.amount)),
            amount,
        )
    }

    /// Best-first ask levels until their amounts cover `amount`
    pub fn asks_to_fill(&self, amount: Decimal) -> Vec<BookLevel> {
        Self::levels_to_fill(
            self.asks
                .iter()
                .map(|(rate, entry)| BookLevel::new(*rate, entry.amount)),
            amount,
        )
    }

    fn levels_to_fill(levels: impl Iterator<Item = BookLevel>, amount: Decimal) -> Vec<BookLevel> {
        let mut result = Vec::new();
        let mut cumulative = Decimal::ZERO;
        for level in levels {
            if cumulative >= amount {
                break;
            }
            cumulative += level.amount;
            result.push(level);
        }
        result
    }

    /// Ask-side liquidity between the best ask and `percent` above it:
    /// what a buyer must sweep to raise the price that far
    pub fn raise_amount(&self, percent: Decimal) -> Decimal {
        let Some((best, _)) = self.asks.iter().next() else {
            return Decimal::ZERO;
        };
        let bound = *best * (Decimal::ONE + percent / Decimal::ONE_HUNDRED);
        self.ask_amount_in(*best..=bound)
    }

    /// Bid-side liquidity between `percent` below the best bid and the
    /// best bid: what a seller must sweep to lower the price that far
    pub fn lower_amount(&self, percent: Decimal) -> Decimal {
        let Some((best, _)) = self.bids.iter().next_back() else {
            return Decimal::ZERO;
        };
        let bound = *best * (Decimal::ONE - percent / Decimal::ONE_HUNDRED);
        self.bid_amount_in(bound..=*best)
    }

    pub fn top_bids(&self, n: usize) -> Vec<BookLevel> {
        self.bids
            .iter()
            .rev()
            .take(n)
            .map(|(rate, entry)| BookLevel::new(*rate, entry.amount))
            .collect()
    }

    pub fn top_asks(&self, n: usize) -> Vec<BookLevel> {
        self.asks
            .iter()
            .take(n)
            .map(|(rate, entry)| BookLevel::new(*rate, entry.amount))
            .collect()
    }

    pub fn set_last_trade_rate(&mut self, rate: Decimal) {
        self.last_trade_rate = Some(rate);
    }

    pub fn last_trade_rate(&self) -> Option<Decimal> {
        self.last_trade_rate
    }

    /// Highest sequence the book has seen (snapshot or delta)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn snapshot_ready(&self) -> bool {
        self.snapshot_ready
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new(BookConfig::default())
    }
}
