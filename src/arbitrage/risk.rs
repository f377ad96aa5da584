use super::types::Opportunity;
use crate::errors::{AppError, Result};
use crate::market::MarketDataCache;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Multiplier applied to each leg's spread percentage.
    pub spread_weight: f64,
    /// Execution risk points per estimated second.
    pub execution_risk_per_second: f64,
    /// Aggregate score above which execution is skipped.
    pub max_risk: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            spread_weight: 10.0,
            execution_risk_per_second: 5.0,
            max_risk: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub opportunity_id: String,
    pub slippage_risk: f64,
    pub liquidity_risk: f64,
    pub execution_risk: f64,
    /// Unweighted mean of the three components.
    pub aggregate_risk: f64,
    pub risk_adjusted_profit: f64,
    pub assessed_at: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn exceeds(&self, ceiling: f64) -> bool {
        self.aggregate_risk > ceiling
    }
}

/// 24h volume penalty for one leg.
pub fn liquidity_penalty(volume: f64) -> f64 {
    if volume < 100.0 {
        50.0
    } else if volume < 1_000.0 {
        30.0
    } else if volume < 10_000.0 {
        10.0
    } else {
        0.0
    }
}

/// Scores opportunities against the live quote cache. Advisory only.
pub struct RiskScorer {
    cache: Arc<MarketDataCache>,
    config: RiskConfig,
}

impl RiskScorer {
    pub fn new(cache: Arc<MarketDataCache>, config: RiskConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn assess_risk(&self, opportunity: &Opportunity) -> RiskAssessment {
        let legs = opportunity.path.len().max(1) as f64;
        let mut spread_sum = 0.0;
        let mut liquidity_sum = 0.0;
        for symbol in &opportunity.path {
            match self.cache.get_quote(symbol) {
                Some(quote) => {
                    spread_sum += quote.spread_percentage() * self.config.spread_weight;
                    liquidity_sum += liquidity_penalty(quote.volume);
                }
                // A leg that lost its quote scores as the worst case.
                None => {
                    spread_sum += MAX_SCORE;
                    liquidity_sum += liquidity_penalty(0.0);
                }
            }
        }

        let slippage_risk = (spread_sum / legs).min(MAX_SCORE);
        let liquidity_risk = (liquidity_sum / legs).min(MAX_SCORE);
        let seconds = opportunity.estimated_execution_ms as f64 / 1_000.0;
        let execution_risk = (self.config.execution_risk_per_second * seconds).min(MAX_SCORE);
        let aggregate_risk = (slippage_risk + liquidity_risk + execution_risk) / 3.0;

        RiskAssessment {
            opportunity_id: opportunity.id.clone(),
            slippage_risk,
            liquidity_risk,
            execution_risk,
            aggregate_risk,
            risk_adjusted_profit: opportunity.net_profit * (1.0 - aggregate_risk / 100.0),
            assessed_at: Utc::now(),
        }
    }

    /// Assess and reject when the aggregate exceeds `ceiling`.
    pub fn gate(&self, opportunity: &Opportunity, ceiling: f64) -> Result<RiskAssessment> {
        let assessment = self.assess_risk(opportunity);
        if assessment.exceeds(ceiling) {
            info!(
                opportunity_id = %opportunity.id,
                aggregate = assessment.aggregate_risk,
                ceiling,
                "[RISK] opportunity rejected"
            );
            return Err(AppError::RiskExceeded {
                aggregate: assessment.aggregate_risk,
                ceiling,
            });
        }
        Ok(assessment)
    }
}
