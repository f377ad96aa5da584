//! Shared market and order data structures used throughout the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quote assets recognised when a symbol has to be split without venue metadata.
const KNOWN_QUOTE_ASSETS: [&str; 6] = ["USDT", "BUSD", "USDC", "BTC", "ETH", "BNB"];

/// Conservative precision used when a venue reports no step constraints.
pub const DEFAULT_STEP: f64 = 0.000_000_01;

/// Latest best bid/ask and 24h activity for one trading pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    /// 24h traded volume in base-asset units.
    pub volume: f64,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(symbol: impl Into<String>, bid: f64, ask: f64, last: f64, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            bid,
            ask,
            last,
            volume,
            updated_at: Utc::now(),
        }
    }

    /// A quote is consistent when every price is finite and non-negative and
    /// bid does not exceed ask (whenever both are quoted).
    pub fn is_consistent(&self) -> bool {
        let prices = [self.bid, self.ask, self.last, self.volume];
        if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return false;
        }
        !(self.bid > 0.0 && self.ask > 0.0 && self.bid > self.ask)
    }

    /// Both sides quoted with a strictly positive price.
    pub fn is_tradeable(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.bid.is_finite() && self.ask.is_finite()
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Ask/bid spread as a percentage of the bid; zero when the bid is missing.
    pub fn spread_percentage(&self) -> f64 {
        if self.bid <= 0.0 {
            return 0.0;
        }
        (self.ask - self.bid) / self.bid * 100.0
    }
}

/// Exchange trading constraints for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMeta {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub step_size: f64,
    pub tick_size: f64,
    pub min_notional: f64,
}

impl SymbolMeta {
    pub fn new(
        symbol: impl Into<String>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
            step_size: DEFAULT_STEP,
            tick_size: DEFAULT_STEP,
            min_notional: 0.0,
        }
    }

    pub fn with_steps(mut self, step_size: f64, tick_size: f64) -> Self {
        self.step_size = step_size;
        self.tick_size = tick_size;
        self
    }

    pub fn with_min_notional(mut self, min_notional: f64) -> Self {
        self.min_notional = min_notional;
        self
    }

    /// Split a concatenated symbol such as `ETHBTC` on a known quote-asset suffix.
    pub fn infer(symbol: &str) -> Option<Self> {
        let upper = symbol.to_uppercase();
        KNOWN_QUOTE_ASSETS.iter().find_map(|quote| {
            let base = upper.strip_suffix(quote)?;
            (!base.is_empty()).then(|| Self::new(upper.clone(), base, *quote))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

/// Venue-reported lifecycle of a single order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Filled or partially filled: the leg may proceed.
    pub fn is_fill(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::PartiallyFilled)
    }

    /// The order will never fill.
    pub fn is_dead(self) -> bool {
        matches!(
            self,
            OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// Acknowledgement returned by order placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHandle {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub status: OrderStatus,
}

/// Result of an order status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReport {
    pub order_id: String,
    pub status: OrderStatus,
    /// Base-asset quantity filled so far.
    pub executed_qty: f64,
    /// Quote-asset amount exchanged so far.
    pub cumulative_quote_qty: f64,
}
