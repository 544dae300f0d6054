use async_trait::async_trait;
use tokio::sync::mpsc;

use bookflow_core::{BookSnapshot, FeedMessage, MarketId, QualifiedMarket};

use super::errors::{FetchError, TransportError};

/// A live feed connection: control handle plus the inbound message stream
pub struct FeedConnection {
    pub control: Box<dyn FeedControl>,
    pub messages: mpsc::Receiver<FeedMessage>,
}

/// Trait for opening feed connections to an exchange
/// Implemented per exchange by the wire-level adapter
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Open a connection subscribed to the given markets
    async fn connect(&self, markets: &[MarketId]) -> Result<FeedConnection, TransportError>;
}

/// Control surface of an open feed connection
#[async_trait]
pub trait FeedControl: Send + Sync {
    /// Send a keepalive ping
    async fn ping(&self) -> Result<(), TransportError>;

    /// Subscribe to additional markets on the open connection
    async fn subscribe(&self, markets: &[MarketId]) -> Result<(), TransportError>;

    /// Close the connection. Best effort, the read side reports Disconnected.
    async fn close(&self);
}

/// Trait for fetching full order book snapshots
/// Only snapshot capability, REST details stay behind the adapter
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self, market: &QualifiedMarket) -> Result<BookSnapshot, FetchError>;
}

/// Trait for decoding wire frames into normalized feed messages
pub trait FeedDecoder: Send + Sync {
    /// Decode one text frame. Returns None if the frame carries nothing
    /// the engine consumes (acks, heartbeat payloads).
    fn decode(&self, text: &str) -> Option<FeedMessage>;
}
