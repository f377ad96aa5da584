use crate::arbitrage::{Opportunity, ScannerConfig};
use crate::execution::{Execution, ExecutionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy parameters for one bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    pub id: String,
    pub name: String,
    /// Pair universe, path length and profit threshold.
    pub scanner: ScannerConfig,
    pub cadence: Duration,
    pub simulate: bool,
    /// Aggregate risk ceiling.
    pub max_risk: f64,
    /// Cycles are skipped when the cache was refreshed longer ago than this.
    pub freshness: Duration,
}

impl BotConfig {
    pub fn new(id: impl Into<String>, scanner: ScannerConfig) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            scanner,
            cadence: Duration::from_secs(5),
            simulate: true,
            max_risk: 50.0,
            freshness: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotStatistics {
    /// Every terminal execution, cancelled ones included.
    pub total_trades: u64,
    pub completed_trades: u64,
    pub successful_trades: u64,
    /// Completed at a loss, or failed.
    pub failed_trades: u64,
    pub total_profit: f64,
    pub total_loss: f64,
    /// Net result per completed trade.
    pub average_profit: f64,
    pub best_trade: Option<f64>,
    pub worst_trade: Option<f64>,
    pub total_fees: f64,
    /// Percentage of all trades that completed with a profit.
    pub win_rate: f64,
    pub started_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for BotStatistics {
    fn default() -> Self {
        Self {
            total_trades: 0,
            completed_trades: 0,
            successful_trades: 0,
            failed_trades: 0,
            total_profit: 0.0,
            total_loss: 0.0,
            average_profit: 0.0,
            best_trade: None,
            worst_trade: None,
            total_fees: 0.0,
            win_rate: 0.0,
            started_at: Utc::now(),
            updated_at: None,
        }
    }
}

impl BotStatistics {
    /// Fold a terminal execution into the running totals. Non-terminal records are ignored.
    pub fn record(&mut self, execution: &Execution) {
        if !execution.is_terminal() {
            return;
        }
        self.total_trades += 1;
        self.total_fees += execution.total_fees;
        match execution.status {
            ExecutionStatus::Completed => {
                let profit = execution.actual_profit;
                if profit > 0.0 {
                    self.successful_trades += 1;
                    self.total_profit += profit;
                } else {
                    self.failed_trades += 1;
                    self.total_loss += -profit;
                }
                self.completed_trades += 1;
                self.best_trade = Some(self.best_trade.map_or(profit, |b| b.max(profit)));
                self.worst_trade = Some(self.worst_trade.map_or(profit, |w| w.min(profit)));
                self.average_profit =
                    (self.total_profit - self.total_loss) / self.completed_trades as f64;
            }
            ExecutionStatus::Failed => self.failed_trades += 1,
            _ => {}
        }
        self.win_rate = self.successful_trades as f64 / self.total_trades as f64 * 100.0;
        self.updated_at = Some(Utc::now());
    }
}

/// Point-in-time view of one bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
    pub bot_id: String,
    pub name: String,
    pub running: bool,
    pub simulate: bool,
    pub cadence_ms: u64,
    pub last_opportunity: Option<Opportunity>,
    pub last_execution: Option<Execution>,
    pub statistics: BotStatistics,
}

/// Two bots whose latest executions traded the same symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BotConflict {
    pub bot_a: String,
    pub bot_b: String,
    pub symbol: String,
}

/// What one scan cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    StaleData,
    NoOpportunity,
    RiskRejected { aggregate: f64, ceiling: f64 },
    AdmissionRejected,
    Dispatched { execution_id: String },
    ExecutorError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(status: ExecutionStatus, profit: f64, fees: f64) -> Execution {
        Execution {
            id: "e".into(),
            bot_id: "bot".into(),
            opportunity_id: "o".into(),
            status,
            simulated: true,
            path: vec!["AB".into()],
            start_asset: "A".into(),
            initial_amount: 1_000.0,
            final_amount: 1_000.0 + profit,
            actual_profit: profit,
            profit_percentage: profit / 10.0,
            total_fees: fees,
            slippage: 0.0,
            legs: Vec::new(),
            unwind_orders: Vec::new(),
            error: None,
            failed_leg: None,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            duration_ms: Some(0),
        }
    }

    #[test]
    fn statistics_fold_wins_losses_and_failures() {
        let mut stats = BotStatistics::default();
        stats.record(&finished(ExecutionStatus::Completed, 4.0, 1.0));
        stats.record(&finished(ExecutionStatus::Completed, -2.0, 1.0));
        stats.record(&finished(ExecutionStatus::Failed, 0.0, 0.5));
        stats.record(&finished(ExecutionStatus::Cancelled, 0.0, 0.0));
        stats.record(&finished(ExecutionStatus::Executing, 100.0, 9.0));

        assert_eq!(stats.total_trades, 4);
        assert_eq!(stats.completed_trades, 2);
        assert_eq!(stats.successful_trades, 1);
        assert_eq!(stats.failed_trades, 2);
        assert_eq!(stats.total_profit, 4.0);
        assert_eq!(stats.total_loss, 2.0);
        assert_eq!(stats.average_profit, 1.0);
        assert_eq!(stats.best_trade, Some(4.0));
        assert_eq!(stats.worst_trade, Some(-2.0));
        assert_eq!(stats.total_fees, 2.5);
        assert_eq!(stats.win_rate, 25.0);
    }

    #[test]
    fn best_and_worst_start_from_first_trade() {
        let mut stats = BotStatistics::default();
        stats.record(&finished(ExecutionStatus::Completed, 3.0, 0.0));
        assert_eq!(stats.best_trade, Some(3.0));
        assert_eq!(stats.worst_trade, Some(3.0));
    }
}
