mod market;
mod side;

pub use market::{ExchangeId, MarketId, QualifiedMarket};
pub use side::Side;

pub type Timestamp = chrono::DateTime<chrono::Utc>;
