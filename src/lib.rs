//! Core library for the triangular arbitrage engine.
//!
//! Market data flows from a feed into [`market::MarketDataCache`]; bots scan it for
//! closed asset cycles, gate them on risk and hand them to the execution engine.

pub mod arbitrage;
pub mod bot;
pub mod cex;
pub mod config;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod execution;
pub mod market;
pub mod models;
pub mod utils;

#[cfg(test)]
pub(crate) mod testutil;
