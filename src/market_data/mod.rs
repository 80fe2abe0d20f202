pub mod cache;
pub mod candle;

// Re-exported for convenient access (e.g. `use crate::market_data::Candle`).
pub use cache::{CacheSettings, CandleSource, MarketDataCache};
pub use candle::Candle;
