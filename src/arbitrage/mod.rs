//! Opportunity detection: candidate path enumeration, conversion math, ranking and risk.
//!
//! Responsibilities:
//! • Model the pair universe as a directed currency graph.
//! • Chain conversions along closed walks net of taker fees and modeled slippage.
//! • Rank valid opportunities and score their execution risk.

pub mod evaluator;
pub mod graph;
pub mod risk;
pub mod scanner;
pub mod types;

pub use evaluator::{confidence, evaluate_path};
pub use graph::{CurrencyGraph, PairEdge, PathCandidate};
pub use risk::{RiskAssessment, RiskConfig, RiskScorer};
pub use scanner::OpportunityScanner;
pub use types::{Opportunity, ScanMethod, ScanStats, ScannerConfig, TradeStep};
