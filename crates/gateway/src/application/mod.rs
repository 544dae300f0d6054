pub mod exchange_manager;
pub mod router;
pub mod serializer;
pub mod session;

pub use exchange_manager::{AdapterRegistry, ExchangeAdapter, ExchangeManager, ManagerError};
pub use router::EventRouter;
pub use serializer::{NonceClock, NonceCursor, RequestSerializer, SystemClock};
pub use session::{ExchangeSession, SessionHandle};
