pub mod market_cap;
pub mod price_stream;

// Re-exports for convenient access (e.g. `use crate::market_data::PriceBook`).
pub use market_cap::{MarketCapEntry, MarketCapStore};
pub use price_stream::{PriceBook, PriceStreamManager, StreamStatus};
