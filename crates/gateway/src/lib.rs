//! Exchange feed engine
//!
//! Maintains live order books and trade feeds per (exchange, market),
//! fed by unreliable delta streams, and governs the lifecycle of the
//! underlying connections.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        ExchangeManager                         │
//! │     (config-driven session arena, compile-time adapters)       │
//! │  ┌──────────────────┐  ┌──────────────────┐                    │
//! │  │ ExchangeSession  │  │ ExchangeSession  │   ...              │
//! │  │  connect/ping/   │  │                  │                    │
//! │  │  idle/reconnect  │  │                  │                    │
//! │  └────────┬─────────┘  └────────┬─────────┘                    │
//! │           │ FeedMessage         │                              │
//! │           ▼                     ▼                              │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │                      EventRouter                         │  │
//! │  │   per-market SequenceBuffer, trade fan-out, snapshots    │  │
//! │  └────────────────────────────┬─────────────────────────────┘  │
//! │                               ▼                                │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │                      BookManager                         │  │
//! │  │        OrderBook per market (shared read handles)        │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Private API calls go through [`RequestSerializer`], which issues
//! strictly increasing nonces and runs one request at a time per
//! credential set.

pub mod application;
pub mod book;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types for convenience

// Config layer
pub use config::{
    ConfigError, ExchangeConfig, FeedConfigFile, SessionConfig, load_config, load_config_from_str,
};

// Domain layer
pub use domain::{
    FeedConnection, FeedControl, FeedDecoder, FeedTransport, FetchError, SequenceBuffer,
    SessionState, SnapshotFetcher, TransportError,
};

// Books
pub use book::{BookConfig, BookManager, OrderBook, SharedBook};

// Application layer
pub use application::{
    AdapterRegistry, EventRouter, ExchangeAdapter, ExchangeManager, ExchangeSession, ManagerError,
    NonceClock, NonceCursor, RequestSerializer, SessionHandle, SystemClock,
};

// Infrastructure
pub use infrastructure::{
    FrameEncoder, JsonFeedCodec, RestError, RestSnapshotFetcher, WsError, WsTransport,
};
