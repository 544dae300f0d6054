pub mod errors;
pub mod sequence;
pub mod session_state;
pub mod traits;

pub use errors::{FetchError, TransportError};
pub use sequence::SequenceBuffer;
pub use session_state::SessionState;
pub use traits::{FeedConnection, FeedControl, FeedDecoder, FeedTransport, SnapshotFetcher};
