use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price level in the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub rate: Decimal,
    pub amount: Decimal,
}

impl BookLevel {
    pub fn new(rate: Decimal, amount: Decimal) -> Self {
        BookLevel { rate, amount }
    }

    pub fn is_empty(&self) -> bool {
        self.amount <= Decimal::ZERO
    }
}

impl From<(Decimal, Decimal)> for BookLevel {
    fn from((rate, amount): (Decimal, Decimal)) -> Self {
        BookLevel { rate, amount }
    }
}
