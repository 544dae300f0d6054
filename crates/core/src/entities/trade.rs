use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::{Side, Timestamp};

/// An executed trade as reported by the exchange feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Exchange-assigned trade id
    pub id: u64,
    pub rate: Decimal,
    pub amount: Decimal,
    /// Taker side
    pub side: Side,
    pub timestamp: Timestamp,
}

impl Trade {
    pub fn new(id: u64, rate: Decimal, amount: Decimal, side: Side, timestamp: Timestamp) -> Self {
        Trade {
            id,
            rate,
            amount,
            side,
            timestamp,
        }
    }

    /// Notional value of the trade in quote currency
    pub fn value(&self) -> Decimal {
        self.rate * self.amount
    }
}
