use rust_decimal::Decimal;

use crate::entities::Trade;
use crate::value_objects::QualifiedMarket;

/// A batch of trades from one feed message, fanned out to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeBatch {
    pub market: QualifiedMarket,
    pub trades: Vec<Trade>,
}

impl TradeBatch {
    pub fn new(market: QualifiedMarket, trades: Vec<Trade>) -> Self {
        TradeBatch { market, trades }
    }

    /// Rate of the most recent trade in the batch
    pub fn last_rate(&self) -> Option<Decimal> {
        self.trades.last().map(|t| t.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::Side;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_last_rate_uses_final_trade() {
        let market = QualifiedMarket::new("bitvavo", "BTC-EUR");
        let batch = TradeBatch::new(
            market.clone(),
            vec![
                Trade::new(1, dec!(100), dec!(1), Side::Buy, Utc::now()),
                Trade::new(2, dec!(101), dec!(2), Side::Sell, Utc::now()),
            ],
        );
        assert_eq!(batch.last_rate(), Some(dec!(101)));
        assert_eq!(TradeBatch::new(market, vec![]).last_rate(), None);
    }
}
