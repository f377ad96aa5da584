//! CEX WebSocket client.
//!
//! Responsibilities:
//! • Maintain a connection to the venue's public all-market ticker feed.
//! • Map ticker entries to quotes and merge them into the shared cache.

pub mod binance;

pub use binance::{BINANCE_WS_ENDPOINT, connect_and_stream, spawn_ticker_feed};
