mod book_level;
mod trade;

pub use book_level::BookLevel;
pub use trade::Trade;
