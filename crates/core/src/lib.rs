pub mod entities;
pub mod events;
pub mod value_objects;

// Re-export value objects at crate root for convenience
pub use value_objects::{ExchangeId, MarketId, QualifiedMarket, Side, Timestamp};

// Re-export entities at crate root
pub use entities::{BookLevel, Trade};

// Re-export events at crate root
pub use events::{BookSnapshot, FeedEvent, FeedMessage, TradeBatch};
