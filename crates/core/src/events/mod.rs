mod feed_events;
mod trade_events;

pub use feed_events::{BookSnapshot, FeedEvent, FeedMessage};
pub use trade_events::TradeBatch;
