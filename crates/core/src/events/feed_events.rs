use serde::{Deserialize, Serialize};

use crate::entities::{BookLevel, Trade};
use crate::value_objects::{QualifiedMarket, Side};

/// Full book image used to (re)initialize an order book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    /// Sequence number the snapshot is consistent with
    pub sequence: u64,
}

impl BookSnapshot {
    pub fn new(bids: Vec<BookLevel>, asks: Vec<BookLevel>, sequence: u64) -> Self {
        BookSnapshot {
            bids,
            asks,
            sequence,
        }
    }
}

/// A decoded market event, normalized across exchange wire formats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// An executed trade
    Trade(Trade),
    /// Liquidity added at a price level (Buy hits bids, Sell hits asks)
    Add { side: Side, level: BookLevel },
    /// Liquidity removed at a price level
    Remove { side: Side, level: BookLevel },
    /// Full book image, replaces queued deltas up to its sequence
    Snapshot(BookSnapshot),
    /// Atomic replacement of the whole book with the given levels
    ReplaceAll {
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
    },
}

impl FeedEvent {
    pub fn is_snapshot(&self) -> bool {
        matches!(self, FeedEvent::Snapshot(_))
    }
}

/// Messages received from a feed connection
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// Decoded batch of events for one market, tagged with its wire sequence
    Events {
        market: QualifiedMarket,
        sequence: u64,
        events: Vec<FeedEvent>,
    },
    /// Raw message (couldn't decode)
    Raw(String),
    /// Connection error
    Error(String),
    /// Disconnected
    Disconnected,
}
