use crate::models::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How candidate paths are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMethod {
    /// Brute force for small universes, graph search otherwise.
    Auto,
    /// Depth-first closed walks over the currency graph.
    Graph,
    /// Every ordered, symbol-distinct permutation of the universe.
    BruteForce,
}

/// Configuration for path scanning and profit calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Legs per path, 3 to 5.
    pub path_length: usize,
    /// Pairs the scan may use; empty means every cached symbol.
    pub symbols: Vec<String>,
    /// Assets a cycle may start from; empty means any asset.
    pub start_assets: Vec<String>,
    /// Notional in start-asset units.
    pub initial_amount: f64,
    /// Minimum profit percentage for a path to be valid.
    pub min_profit_percentage: f64,
    /// Taker fee in percent, charged on each leg's output.
    pub taker_fee_percentage: f64,
    /// Modeled slippage in percent of the initial notional.
    pub slippage_percentage: f64,
    /// Estimated latency per leg, used for execution-time estimates.
    pub leg_latency_ms: u64,
    /// Quotes older than this invalidate any path through them.
    pub max_quote_age: Duration,
    pub method: ScanMethod,
    /// Universes up to this size are brute-forced under `ScanMethod::Auto`.
    pub brute_force_max_symbols: usize,
    /// Search-iteration ceiling for one scan.
    pub max_candidates: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            path_length: 3,
            symbols: Vec::new(),
            start_assets: Vec::new(),
            initial_amount: 1_000.0,
            min_profit_percentage: 0.1,
            taker_fee_percentage: 0.1,
            slippage_percentage: 0.05,
            leg_latency_ms: 1_000,
            max_quote_age: Duration::from_secs(10),
            method: ScanMethod::Auto,
            brute_force_max_symbols: 8,
            max_candidates: 500_000,
        }
    }
}

impl ScannerConfig {
    pub fn fee_fraction(&self) -> f64 {
        self.taker_fee_percentage / 100.0
    }

    pub fn estimated_execution_ms(&self, legs: usize) -> u64 {
        self.leg_latency_ms * legs as u64
    }
}

/// One leg of a modeled conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeStep {
    pub symbol: String,
    pub side: Side,
    /// Ask for BUY, bid for SELL.
    pub price: f64,
    /// Base-asset order quantity.
    pub quantity: f64,
    /// Asset held before the leg.
    pub from_asset: String,
    /// Asset held after the leg.
    pub to_asset: String,
    /// Balance entering the leg, in `from_asset`.
    pub input_amount: f64,
    /// Balance leaving the leg after fees, in `to_asset`.
    pub amount: f64,
    /// Fee charged, in `to_asset`.
    pub fee: f64,
    /// Fee as a fraction of the pre-fee output.
    pub fee_percentage: f64,
}

impl TradeStep {
    /// Output of the leg before the fee was taken.
    pub fn pre_fee_amount(&self) -> f64 {
        self.amount + self.fee
    }
}

/// A profitable closed cycle found by the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    /// Symbols in execution order.
    pub path: Vec<String>,
    pub start_asset: String,
    pub steps: Vec<TradeStep>,
    pub initial_amount: f64,
    pub final_amount: f64,
    pub gross_profit: f64,
    /// Fee drag valued in the start asset.
    pub total_fees: f64,
    /// Modeled slippage in the start asset.
    pub slippage: f64,
    pub net_profit: f64,
    pub profit_percentage: f64,
    pub confidence: f64,
    pub estimated_execution_ms: u64,
    pub discovered_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn legs(&self) -> usize {
        self.path.len()
    }

    pub fn touches(&self, symbol: &str) -> bool {
        self.path.iter().any(|s| s == symbol)
    }
}

/// Summary of one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    pub candidates: usize,
    pub invalid: usize,
    pub valid: usize,
    pub average_profit_percentage: f64,
    pub max_profit_percentage: f64,
    pub min_profit_percentage: f64,
    pub scanned_at: Option<DateTime<Utc>>,
}
