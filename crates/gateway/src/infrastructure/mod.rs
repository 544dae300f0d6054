pub mod json_codec;
pub mod rest;
pub mod ws;

pub use json_codec::JsonFeedCodec;
pub use rest::{RestError, RestSnapshotFetcher};
pub use ws::{FrameEncoder, WsError, WsTransport};
