//! Market data: the shared quote cache and the loops that keep it current.
//!
//! Responsibilities:
//! • Hold the latest quote per trading pair and the symbol step constraints.
//! • Answer derived price queries and freshness checks.
//! • Refresh quotes on a timer through the exchange capability.

pub mod cache;
pub mod feed;

pub use cache::{CacheSnapshot, MarketDataCache};
pub use feed::{load_symbol_meta, poll_quotes, spawn_quote_poller};
