use serde::Deserialize;
use serde_json::json;

use bookflow_core::{ExchangeId, FeedEvent, FeedMessage, MarketId, QualifiedMarket};

use super::ws::FrameEncoder;
use crate::domain::FeedDecoder;

/// Wire envelope carrying one sequenced event batch for a market
#[derive(Debug, Deserialize)]
struct Envelope {
    market: String,
    sequence: u64,
    events: Vec<FeedEvent>,
}

/// Reference wire format: JSON envelopes of tagged feed events.
///
/// Exchanges with bespoke dialects get their own encoder/decoder pair;
/// this codec serves feeds that already speak the engine's envelope
/// (simulators, relays, test rigs).
pub struct JsonFeedCodec {
    exchange: ExchangeId,
}

impl JsonFeedCodec {
    pub fn new(exchange: ExchangeId) -> Self {
        JsonFeedCodec { exchange }
    }
}

impl FrameEncoder for JsonFeedCodec {
    fn subscribe_frames(&self, markets: &[MarketId]) -> Vec<String> {
        let markets: Vec<&str> = markets.iter().map(|m| m.as_str()).collect();
        vec![json!({ "action": "subscribe", "markets": markets }).to_string()]
    }
}

impl FeedDecoder for JsonFeedCodec {
    fn decode(&self, text: &str) -> Option<FeedMessage> {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => Some(FeedMessage::Events {
                market: QualifiedMarket {
                    exchange: self.exchange.clone(),
                    market: MarketId::new(envelope.market),
                },
                sequence: envelope.sequence,
                events: envelope.events,
            }),
            // Unknown frames surface as raw text so callers can log them
            Err(_) => Some(FeedMessage::Raw(text.to_string())),
        }
    }
}
