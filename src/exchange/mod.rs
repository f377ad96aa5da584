//! Exchange capability consumed by the engine.
//!
//! The transport client itself lives outside this crate; the engine only needs
//! quote lookup, symbol constraints, order placement, status and cancellation.

use crate::errors::Result;
use crate::models::{OrderHandle, OrderReport, Quote, Side, SymbolMeta};
use async_trait::async_trait;

pub mod paper;

pub use paper::PaperExchange;

#[async_trait]
pub trait Exchange: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Result<Quote>;

    async fn get_symbol_metadata(&self, symbol: &str) -> Result<SymbolMeta>;

    /// Place a limit order for `quantity` base units at `price`.
    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> Result<OrderHandle>;

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderReport>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;
}
