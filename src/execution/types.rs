use crate::models::{OrderStatus, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// pending → executing → {completed, failed, cancelled}; pending may also fail or be
    /// cancelled.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Executing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Executing, Cancelled)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What to do with already-filled legs when a later leg fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnwindPolicy {
    /// Leave the position for manual reconciliation.
    #[default]
    LeaveOpen,
    /// Reverse filled legs, newest first, at the current touch.
    BestEffort,
}

impl std::str::FromStr for UnwindPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leave_open" | "none" => Ok(UnwindPolicy::LeaveOpen),
            "best_effort" => Ok(UnwindPolicy::BestEffort),
            other => Err(format!("unknown unwind policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    pub order_timeout: Duration,
    /// Fraction of modeled net profit lost to slippage in simulated runs.
    pub simulated_slippage_fraction: f64,
    /// Taker fee in percent, applied to each leg's received amount.
    pub taker_fee_percentage: f64,
    pub unwind_policy: UnwindPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            poll_interval: Duration::from_millis(500),
            order_timeout: Duration::from_secs(30),
            simulated_slippage_fraction: 0.1,
            taker_fee_percentage: 0.1,
            unwind_policy: UnwindPolicy::LeaveOpen,
        }
    }
}

/// One order placed for a leg (or for unwinding one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegOrder {
    /// 1-based position in the path.
    pub leg: usize,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub status: OrderStatus,
    pub executed_qty: f64,
    pub cumulative_quote_qty: f64,
    /// Amount received after fees, in the leg's output asset.
    pub received: f64,
    pub placed_at: DateTime<Utc>,
}

impl LegOrder {
    /// Still resting on the venue, including the remainder of a partial fill.
    pub fn is_open(&self) -> bool {
        matches!(self.status, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub bot_id: String,
    pub opportunity_id: String,
    pub status: ExecutionStatus,
    pub simulated: bool,
    pub path: Vec<String>,
    pub start_asset: String,
    pub initial_amount: f64,
    pub final_amount: f64,
    pub actual_profit: f64,
    pub profit_percentage: f64,
    pub total_fees: f64,
    pub slippage: f64,
    pub legs: Vec<LegOrder>,
    pub unwind_orders: Vec<LegOrder>,
    pub error: Option<String>,
    /// 1-based index of the leg that failed, if any.
    pub failed_leg: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl Execution {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply `next` when the state machine allows it; stamps completion on terminal states.
    pub fn transition(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            let now = Utc::now();
            self.completed_at = Some(now);
            self.duration_ms = Some((now - self.started_at).num_milliseconds());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutionStatus::*;

    #[test]
    fn terminal_states_never_reenter_executing() {
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Pending, Executing, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(Pending.can_transition_to(Executing));
        assert!(!Executing.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn unwind_policy_parses_config_values() {
        assert_eq!("leave_open".parse::<UnwindPolicy>().unwrap(), UnwindPolicy::LeaveOpen);
        assert_eq!("BEST_EFFORT".parse::<UnwindPolicy>().unwrap(), UnwindPolicy::BestEffort);
        assert!("sometimes".parse::<UnwindPolicy>().is_err());
    }

    #[test]
    fn partially_filled_legs_stay_cancellable() {
        let mut leg = LegOrder {
            leg: 1,
            order_id: "o-1".into(),
            symbol: "AB".into(),
            side: Side::Sell,
            price: 100.0,
            quantity: 10.0,
            status: OrderStatus::New,
            executed_qty: 0.0,
            cumulative_quote_qty: 0.0,
            received: 0.0,
            placed_at: Utc::now(),
        };
        assert!(leg.is_open());
        leg.status = OrderStatus::PartiallyFilled;
        assert!(leg.is_open());
        for closed in [OrderStatus::Filled, OrderStatus::Canceled, OrderStatus::Rejected] {
            leg.status = closed;
            assert!(!leg.is_open());
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Cancelled).unwrap(), "\"cancelled\"");
    }
}
