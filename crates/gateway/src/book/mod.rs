pub mod manager;
pub mod order_book;

pub use manager::{BookManager, SharedBook};
pub use order_book::{BookConfig, OrderBook};
