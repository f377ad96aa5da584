use super::types::{Execution, ExecutionConfig, ExecutionStatus, LegOrder, UnwindPolicy};
use crate::arbitrage::{Opportunity, TradeStep};
use crate::errors::{AppError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::exchange::Exchange;
use crate::market::MarketDataCache;
use crate::models::{OrderReport, OrderStatus, Side};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const EXECUTION_HISTORY_CAPACITY: usize = 1_000;

/// Accepted execution: its pending snapshot plus a receiver resolved with the terminal record.
#[derive(Debug)]
pub struct ExecutionTicket {
    pub execution: Execution,
    pub completion: oneshot::Receiver<Execution>,
}

/// Turns an accepted opportunity into a running execution.
pub trait ArbitrageExecutor: Send + Sync {
    fn execute_arbitrage(
        &self,
        opportunity: &Opportunity,
        bot_id: &str,
        simulate: bool,
    ) -> Result<ExecutionTicket>;
}

#[derive(Debug)]
struct ActiveExecution {
    execution: Execution,
    cancel_requested: bool,
    completion: Option<oneshot::Sender<Execution>>,
}

#[derive(Debug, Default)]
struct EngineState {
    active: HashMap<String, ActiveExecution>,
    history: VecDeque<Execution>,
}

enum LegWait {
    Filled(OrderReport),
    Failed(String),
    Cancelled,
}

struct EngineInner {
    exchange: Arc<dyn Exchange>,
    cache: Arc<MarketDataCache>,
    config: ExecutionConfig,
    events: EventBus,
    state: Mutex<EngineState>,
}

/// Runs multi-leg executions with admission control and fill polling.
///
/// The active set and the admission check share one critical section, so at most
/// `max_concurrent` executions are ever in flight. Legs of one execution run strictly
/// in order on a spawned task; execution records are finalized exactly once.
#[derive(Clone)]
pub struct TradeExecutionEngine {
    inner: Arc<EngineInner>,
}

impl TradeExecutionEngine {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        cache: Arc<MarketDataCache>,
        config: ExecutionConfig,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                exchange,
                cache,
                config,
                events,
                state: Mutex::new(EngineState::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.inner.config
    }

    fn fee_fraction(&self) -> f64 {
        self.inner.config.taker_fee_percentage / 100.0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().active.len()
    }

    /// Executions still pending or executing, oldest first.
    pub fn get_executing_trades(&self) -> Vec<Execution> {
        let mut active: Vec<Execution> = self
            .lock()
            .active
            .values()
            .map(|a| a.execution.clone())
            .collect();
        active.sort_by_key(|e| e.started_at);
        active
    }

    pub fn get_execution(&self, id: &str) -> Option<Execution> {
        let state = self.lock();
        state
            .active
            .get(id)
            .map(|a| a.execution.clone())
            .or_else(|| state.history.iter().rev().find(|e| e.id == id).cloned())
    }

    /// Finished executions, oldest first.
    pub fn recent_executions(&self) -> Vec<Execution> {
        self.lock().history.iter().cloned().collect()
    }

    /// Admit `opportunity` and run it in the background.
    pub fn execute_arbitrage(
        &self,
        opportunity: &Opportunity,
        bot_id: &str,
        simulate: bool,
    ) -> Result<ExecutionTicket> {
        if opportunity.steps.is_empty() || opportunity.steps.len() != opportunity.path.len() {
            return Err(AppError::Validation(format!(
                "opportunity {} has no executable legs",
                opportunity.id
            )));
        }

        let now = Utc::now();
        let execution = Execution {
            id: Uuid::new_v4().to_string(),
            bot_id: bot_id.to_string(),
            opportunity_id: opportunity.id.clone(),
            status: ExecutionStatus::Pending,
            simulated: simulate,
            path: opportunity.path.clone(),
            start_asset: opportunity.start_asset.clone(),
            initial_amount: opportunity.initial_amount,
            final_amount: 0.0,
            actual_profit: 0.0,
            profit_percentage: 0.0,
            total_fees: 0.0,
            slippage: 0.0,
            legs: Vec::new(),
            unwind_orders: Vec::new(),
            error: None,
            failed_leg: None,
            started_at: now,
            completed_at: None,
            duration_ms: None,
        };
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.lock();
            let limit = self.inner.config.max_concurrent;
            if state.active.len() >= limit {
                info!(bot_id, in_flight = state.active.len(), limit, "[EXEC] admission rejected");
                return Err(AppError::ConcurrencyLimit { limit });
            }
            state.active.insert(
                execution.id.clone(),
                ActiveExecution {
                    execution: execution.clone(),
                    cancel_requested: false,
                    completion: Some(tx),
                },
            );
        }

        info!(
            execution_id = %execution.id,
            bot_id,
            simulate,
            path = ?execution.path,
            "[EXEC] execution accepted"
        );
        self.inner
            .events
            .publish(EngineEvent::ExecutionUpdated(execution.clone()));

        let engine = self.clone();
        let id = execution.id.clone();
        let opportunity = opportunity.clone();
        tokio::spawn(async move {
            engine.run(id, opportunity, simulate).await;
        });

        Ok(ExecutionTicket {
            execution,
            completion: rx,
        })
    }

    async fn run(&self, id: String, opportunity: Opportunity, simulate: bool) {
        if !self.mark_executing(&id) {
            return;
        }
        if simulate {
            self.run_simulated(&id, &opportunity).await;
        } else {
            self.run_legs(&id, &opportunity).await;
        }
    }

    fn mark_executing(&self, id: &str) -> bool {
        let snapshot = {
            let mut state = self.lock();
            let Some(entry) = state.active.get_mut(id) else {
                return false;
            };
            if entry.cancel_requested || !entry.execution.transition(ExecutionStatus::Executing) {
                return false;
            }
            entry.execution.clone()
        };
        self.inner.events.publish(EngineEvent::ExecutionUpdated(snapshot));
        true
    }

    fn cancel_requested(&self, id: &str) -> bool {
        self.lock()
            .active
            .get(id)
            .is_none_or(|entry| entry.cancel_requested)
    }

    /// Apply a terminal transition, then move the record to history and resolve the ticket.
    ///
    /// A flagged cancellation owns finalization, so the runner's outcome is dropped then.
    fn finish<F>(&self, id: &str, status: ExecutionStatus, update: F) -> Option<Execution>
    where
        F: FnOnce(&mut Execution),
    {
        let (execution, completion) = {
            let mut state = self.lock();
            let entry = state.active.get(id)?;
            if entry.cancel_requested {
                return None;
            }
            let mut entry = state.active.remove(id)?;
            update(&mut entry.execution);
            entry.execution.transition(status);
            push_history(&mut state.history, entry.execution.clone());
            (entry.execution, entry.completion)
        };
        if let Some(tx) = completion {
            let _ = tx.send(execution.clone());
        }
        self.inner
            .events
            .publish(EngineEvent::ExecutionUpdated(execution.clone()));
        Some(execution)
    }

    async fn run_simulated(&self, id: &str, opportunity: &Opportunity) {
        tokio::time::sleep(Duration::from_millis(opportunity.estimated_execution_ms)).await;

        let penalty = opportunity.net_profit * self.inner.config.simulated_slippage_fraction;
        let actual_profit = opportunity.net_profit - penalty;
        let finished = self.finish(id, ExecutionStatus::Completed, |e| {
            e.actual_profit = actual_profit;
            e.final_amount = opportunity.initial_amount + actual_profit;
            e.profit_percentage = actual_profit / opportunity.initial_amount * 100.0;
            e.total_fees = opportunity.total_fees;
            e.slippage = penalty;
        });
        if let Some(e) = finished {
            info!(
                execution_id = %e.id,
                profit = e.actual_profit,
                "[EXEC] simulated execution completed"
            );
        }
    }

    async fn run_legs(&self, id: &str, opportunity: &Opportunity) {
        let fee = self.fee_fraction();
        let mut balance = opportunity.initial_amount;
        let mut filled: Vec<LegOrder> = Vec::new();

        for (idx, step) in opportunity.steps.iter().enumerate() {
            let leg = idx + 1;
            if self.cancel_requested(id) {
                debug!(execution_id = id, leg, "[EXEC] cancel observed before leg");
                return;
            }

            let (quantity, price) = match self.prepare_order(step, balance) {
                Ok(order) => order,
                Err(cause) => {
                    self.fail(id, leg, cause, &filled).await;
                    return;
                }
            };

            let handle = match self
                .inner
                .exchange
                .place_order(&step.symbol, step.side, quantity, price)
                .await
            {
                Ok(handle) => handle,
                Err(e) => {
                    self.fail(id, leg, format!("placement failed: {e}"), &filled).await;
                    return;
                }
            };
            debug!(execution_id = id, leg, order_id = %handle.order_id, "[EXEC] leg order placed");

            let mut order = LegOrder {
                leg,
                order_id: handle.order_id,
                symbol: step.symbol.clone(),
                side: step.side,
                price,
                quantity,
                status: handle.status,
                executed_qty: 0.0,
                cumulative_quote_qty: 0.0,
                received: 0.0,
                placed_at: Utc::now(),
            };
            if !self.record_leg(id, &order) {
                // Cancelled while the order was in flight: withdraw it here.
                self.cancel_quietly(&order).await;
                return;
            }

            match self.await_fill(id, &order).await {
                LegWait::Filled(report) => {
                    let gross = match step.side {
                        Side::Buy => report.executed_qty,
                        Side::Sell => report.cumulative_quote_qty,
                    };
                    order.status = report.status;
                    order.executed_qty = report.executed_qty;
                    order.cumulative_quote_qty = report.cumulative_quote_qty;
                    order.received = gross * (1.0 - fee);
                    balance = order.received;
                    self.record_leg(id, &order);
                    filled.push(order);
                }
                LegWait::Failed(cause) => {
                    self.fail(id, leg, cause, &filled).await;
                    return;
                }
                LegWait::Cancelled => return,
            }
        }

        let legs = opportunity.steps.len() as i32;
        let initial = opportunity.initial_amount;
        let expected_final = opportunity.final_amount;
        let finished = self.finish(id, ExecutionStatus::Completed, |e| {
            e.final_amount = balance;
            e.actual_profit = balance - initial;
            e.profit_percentage = e.actual_profit / initial * 100.0;
            e.total_fees = balance / (1.0 - fee).powi(legs) - balance;
            e.slippage = expected_final - balance;
        });
        if let Some(e) = finished {
            info!(
                execution_id = %e.id,
                profit = e.actual_profit,
                duration_ms = ?e.duration_ms,
                "[EXEC] execution completed"
            );
        }
    }

    /// Size and snap the leg order to the symbol's constraints.
    fn prepare_order(
        &self,
        step: &TradeStep,
        balance: f64,
    ) -> std::result::Result<(f64, f64), String> {
        let cache = &self.inner.cache;
        let price = cache.round_price(&step.symbol, step.price);
        if !(price > 0.0) {
            return Err(format!("invalid price {} for {}", step.price, step.symbol));
        }
        let raw_quantity = match step.side {
            Side::Sell => balance,
            Side::Buy => balance / price,
        };
        let quantity = cache.round_quantity(&step.symbol, raw_quantity);
        if !(quantity > 0.0) {
            return Err(format!("quantity {raw_quantity} rounds to zero on {}", step.symbol));
        }
        if let Some(meta) = cache.symbol_meta(&step.symbol) {
            let notional = quantity * price;
            if notional < meta.min_notional {
                return Err(format!(
                    "notional {notional} below minimum {} on {}",
                    meta.min_notional, step.symbol
                ));
            }
        }
        Ok((quantity, price))
    }

    /// Insert or update a leg record; false when the execution is no longer runnable.
    fn record_leg(&self, id: &str, order: &LegOrder) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.active.get_mut(id) else {
            return false;
        };
        let legs = &mut entry.execution.legs;
        match legs.iter().position(|l| l.order_id == order.order_id) {
            Some(pos) => legs[pos] = order.clone(),
            None => legs.push(order.clone()),
        }
        !entry.cancel_requested
    }

    async fn await_fill(&self, id: &str, order: &LegOrder) -> LegWait {
        let config = &self.inner.config;
        let deadline = Instant::now() + config.order_timeout;
        let mut last_error: Option<AppError> = None;
        loop {
            if self.cancel_requested(id) {
                return LegWait::Cancelled;
            }
            match self
                .inner
                .exchange
                .get_order_status(&order.symbol, &order.order_id)
                .await
            {
                Ok(report) if report.status.is_fill() => return LegWait::Filled(report),
                Ok(report) if report.status.is_dead() => {
                    return LegWait::Failed(format!(
                        "order {} ended {:?}",
                        order.order_id, report.status
                    ));
                }
                Ok(_) => last_error = None,
                Err(e) => {
                    warn!(
                        execution_id = id,
                        order_id = %order.order_id,
                        error = %e,
                        "[EXEC] status query failed"
                    );
                    last_error = Some(e);
                }
            }
            if Instant::now() >= deadline {
                let mut cause = format!(
                    "order {} not filled within {:?}",
                    order.order_id, config.order_timeout
                );
                if let Some(e) = last_error {
                    cause.push_str(&format!("; last status query failed: {e}"));
                }
                return LegWait::Failed(cause);
            }
            tokio::time::sleep(config.poll_interval).await;
        }
    }

    async fn fail(&self, id: &str, leg: usize, cause: String, filled: &[LegOrder]) {
        warn!(execution_id = id, leg, cause = %cause, "[EXEC] leg failed");
        let unwind_orders = match self.inner.config.unwind_policy {
            UnwindPolicy::LeaveOpen => Vec::new(),
            UnwindPolicy::BestEffort => self.unwind(id, filled).await,
        };
        let error = AppError::LegFailure { leg, cause }.to_string();
        self.finish(id, ExecutionStatus::Failed, |e| {
            e.error = Some(error);
            e.failed_leg = Some(leg);
            e.unwind_orders = unwind_orders;
        });
    }

    /// Reverse filled legs, newest first, at the current touch. Failures are only logged.
    async fn unwind(&self, id: &str, filled: &[LegOrder]) -> Vec<LegOrder> {
        let cache = &self.inner.cache;
        let mut placed = Vec::new();
        for leg in filled.iter().rev() {
            let side = leg.side.opposite();
            let Some(quote) = cache.get_quote(&leg.symbol) else {
                warn!(
                    execution_id = id,
                    leg = leg.leg,
                    symbol = %leg.symbol,
                    "[EXEC] unwind skipped: no quote"
                );
                continue;
            };
            let price = cache.round_price(
                &leg.symbol,
                match side {
                    Side::Sell => quote.bid,
                    Side::Buy => quote.ask,
                },
            );
            let raw_quantity = match side {
                Side::Sell => leg.received,
                Side::Buy if price > 0.0 => leg.received / price,
                Side::Buy => 0.0,
            };
            let quantity = cache.round_quantity(&leg.symbol, raw_quantity);
            if !(quantity > 0.0 && price > 0.0) {
                warn!(
                    execution_id = id,
                    leg = leg.leg,
                    "[EXEC] unwind skipped: nothing to reverse"
                );
                continue;
            }
            match self
                .inner
                .exchange
                .place_order(&leg.symbol, side, quantity, price)
                .await
            {
                Ok(handle) => {
                    info!(
                        execution_id = id,
                        leg = leg.leg,
                        order_id = %handle.order_id,
                        "[EXEC] unwind order placed"
                    );
                    placed.push(LegOrder {
                        leg: leg.leg,
                        order_id: handle.order_id,
                        symbol: leg.symbol.clone(),
                        side,
                        price,
                        quantity,
                        status: handle.status,
                        executed_qty: 0.0,
                        cumulative_quote_qty: 0.0,
                        received: 0.0,
                        placed_at: Utc::now(),
                    });
                }
                Err(e) => {
                    warn!(
                        execution_id = id,
                        leg = leg.leg,
                        error = %e,
                        "[EXEC] unwind order failed"
                    );
                }
            }
        }
        placed
    }

    async fn cancel_quietly(&self, order: &LegOrder) -> bool {
        match self
            .inner
            .exchange
            .cancel_order(&order.symbol, &order.order_id)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    order_id = %order.order_id,
                    symbol = %order.symbol,
                    error = %e,
                    "[EXEC] leg cancel failed"
                );
                false
            }
        }
    }

    /// Stop a pending or executing execution and cancel its unfilled leg orders.
    pub async fn cancel_execution(&self, id: &str) -> Result<Execution> {
        let open_orders: Vec<LegOrder> = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if !state.active.contains_key(id) {
                return Err(match state.history.iter().find(|e| e.id == id) {
                    Some(done) => AppError::InvalidState(format!(
                        "execution {id} already {}",
                        done.status
                    )),
                    None => AppError::NotFound(format!("execution {id}")),
                });
            }
            let entry = state
                .active
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("execution {id}")))?;
            if entry.cancel_requested {
                return Err(AppError::InvalidState(format!(
                    "execution {id} is already being cancelled"
                )));
            }
            entry.cancel_requested = true;
            entry
                .execution
                .legs
                .iter()
                .filter(|l| l.is_open())
                .cloned()
                .collect()
        };

        let mut cancelled = Vec::new();
        for order in &open_orders {
            if self.cancel_quietly(order).await {
                cancelled.push(order.order_id.clone());
            }
        }

        let (execution, completion) = {
            let mut state = self.lock();
            let mut entry = state.active.remove(id).ok_or_else(|| {
                AppError::InvalidState(format!("execution {id} vanished while cancelling"))
            })?;
            for leg in entry.execution.legs.iter_mut() {
                if cancelled.contains(&leg.order_id) {
                    leg.status = OrderStatus::Canceled;
                }
            }
            entry.execution.error = Some("cancelled".into());
            entry.execution.transition(ExecutionStatus::Cancelled);
            push_history(&mut state.history, entry.execution.clone());
            (entry.execution, entry.completion)
        };
        if let Some(tx) = completion {
            let _ = tx.send(execution.clone());
        }
        info!(
            execution_id = id,
            open_orders = open_orders.len(),
            cancelled = cancelled.len(),
            "[EXEC] execution cancelled"
        );
        self.inner
            .events
            .publish(EngineEvent::ExecutionUpdated(execution.clone()));
        Ok(execution)
    }

    /// Cancel orders still resting on a finished execution; returns how many were cancelled.
    pub async fn cancel_resting_orders(&self, id: &str) -> Result<usize> {
        let resting: Vec<LegOrder> = {
            let state = self.lock();
            let execution = state
                .history
                .iter()
                .rev()
                .find(|e| e.id == id)
                .ok_or_else(|| AppError::NotFound(format!("finished execution {id}")))?;
            execution
                .legs
                .iter()
                .chain(execution.unwind_orders.iter())
                .filter(|l| l.is_open())
                .cloned()
                .collect()
        };
        let mut cancelled = Vec::new();
        for order in &resting {
            if self.cancel_quietly(order).await {
                cancelled.push(order.order_id.clone());
            }
        }
        let mut state = self.lock();
        if let Some(execution) = state.history.iter_mut().rev().find(|e| e.id == id) {
            for leg in execution
                .legs
                .iter_mut()
                .chain(execution.unwind_orders.iter_mut())
            {
                if cancelled.contains(&leg.order_id) {
                    leg.status = OrderStatus::Canceled;
                }
            }
        }
        Ok(cancelled.len())
    }
}

impl ArbitrageExecutor for TradeExecutionEngine {
    fn execute_arbitrage(
        &self,
        opportunity: &Opportunity,
        bot_id: &str,
        simulate: bool,
    ) -> Result<ExecutionTicket> {
        TradeExecutionEngine::execute_arbitrage(self, opportunity, bot_id, simulate)
    }
}

fn push_history(history: &mut VecDeque<Execution>, execution: Execution) {
    if history.len() == EXECUTION_HISTORY_CAPACITY {
        history.pop_front();
    }
    history.push_back(execution);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::{ScannerConfig, evaluate_path};
    use crate::models::{Quote, SymbolMeta};
    use crate::testutil::MockExchange;
    use assert_approx_eq::assert_approx_eq;

    fn scenario_cache() -> Arc<MarketDataCache> {
        let cache = Arc::new(MarketDataCache::new());
        cache.set_symbol_meta(vec![
            SymbolMeta::new("AB", "A", "B"),
            SymbolMeta::new("BC", "B", "C"),
            SymbolMeta::new("CA", "C", "A"),
        ]);
        cache.refresh(vec![
            Quote::new("AB", 100.0, 101.0, 100.0, 50_000.0),
            Quote::new("BC", 2.0, 2.02, 2.0, 50_000.0),
            Quote::new("CA", 0.0051, 0.0052, 0.0051, 50_000.0),
        ]);
        cache
    }

    fn opportunity(cache: &MarketDataCache) -> Opportunity {
        let path = vec!["AB".to_string(), "BC".to_string(), "CA".to_string()];
        evaluate_path(&cache.snapshot(), &path, "A", &ScannerConfig::default()).unwrap()
    }

    type Harness = (Arc<MockExchange>, Arc<MarketDataCache>, TradeExecutionEngine);

    fn engine_with(config: ExecutionConfig) -> Harness {
        let cache = scenario_cache();
        let exchange = Arc::new(MockExchange::new());
        let events = EventBus::default();
        let engine = TradeExecutionEngine::new(exchange.clone(), cache.clone(), config, events);
        (exchange, cache, engine)
    }

    fn engine() -> Harness {
        engine_with(ExecutionConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn admission_rejects_beyond_ceiling_without_a_record() {
        let (_exchange, cache, engine) = engine();
        let opp = opportunity(&cache);
        let mut tickets = Vec::new();
        for _ in 0..5 {
            tickets.push(engine.execute_arbitrage(&opp, "bot", true).unwrap());
        }
        let err = engine.execute_arbitrage(&opp, "bot", true).unwrap_err();
        assert!(matches!(err, AppError::ConcurrencyLimit { limit: 5 }));
        assert_eq!(engine.in_flight(), 5);
        assert_eq!(engine.get_executing_trades().len(), 5);

        for ticket in tickets {
            assert_eq!(ticket.completion.await.unwrap().status, ExecutionStatus::Completed);
        }
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(engine.recent_executions().len(), 5);
        assert!(engine.execute_arbitrage(&opp, "bot", true).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_execution_applies_slippage_penalty() {
        let (exchange, cache, engine) = engine();
        let opp = opportunity(&cache);
        let ticket = engine.execute_arbitrage(&opp, "bot", true).unwrap();
        assert_eq!(ticket.execution.status, ExecutionStatus::Pending);

        let done = ticket.completion.await.unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_approx_eq!(done.actual_profit, opp.net_profit * 0.9, 1e-9);
        assert_approx_eq!(done.final_amount, opp.initial_amount + done.actual_profit, 1e-9);
        assert!(done.legs.is_empty());
        assert_eq!(exchange.calls().place_order, 0);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn real_execution_chains_fills_through_every_leg() {
        let (exchange, cache, engine) = engine();
        let opp = opportunity(&cache);
        let done = engine
            .execute_arbitrage(&opp, "bot", false)
            .unwrap()
            .completion
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.legs.len(), 3);
        assert_eq!(exchange.calls().place_order, 3);
        let placed = exchange.placed();
        assert_eq!(placed[0].quantity, 1_000.0);
        assert_approx_eq!(placed[1].quantity, 99_900.0, 1e-6);
        assert_approx_eq!(done.final_amount, opp.final_amount, 1e-4);
        assert_approx_eq!(done.slippage, 0.0, 1e-4);
        assert_approx_eq!(done.total_fees, opp.total_fees, 1e-3);
        assert!(done.legs.iter().all(|l| l.status == OrderStatus::Filled));
    }

    #[tokio::test(start_paused = true)]
    async fn second_leg_placement_failure_stops_without_cancelling_first() {
        let (exchange, cache, engine) = engine();
        exchange.fail_placement(2);
        let opp = opportunity(&cache);
        let done = engine
            .execute_arbitrage(&opp, "bot", false)
            .unwrap()
            .completion
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(done.failed_leg, Some(2));
        assert_eq!(done.legs.len(), 1);
        assert_eq!(done.legs[0].leg, 1);
        assert!(done.error.as_deref().unwrap_or_default().contains("Leg 2"));
        assert!(done.unwind_orders.is_empty());
        let calls = exchange.calls();
        assert_eq!(calls.place_order, 2);
        assert_eq!(calls.cancel_order, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unfilled_order_times_out() {
        let (exchange, cache, engine) = engine();
        exchange.report_status(OrderStatus::New);
        let opp = opportunity(&cache);
        let done = engine
            .execute_arbitrage(&opp, "bot", false)
            .unwrap()
            .completion
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(done.failed_leg, Some(1));
        assert!(done.error.as_deref().unwrap_or_default().contains("not filled"));
        let calls = exchange.calls();
        assert_eq!(calls.place_order, 1);
        assert!(calls.get_order_status >= 60);
        assert_eq!(calls.cancel_order, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_status_queries_surface_in_leg_failure() {
        let (exchange, cache, engine) = engine();
        exchange.fail_status_queries();
        let done = engine
            .execute_arbitrage(&opportunity(&cache), "bot", false)
            .unwrap()
            .completion
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(done.failed_leg, Some(1));
        let error = done.error.unwrap_or_default();
        assert!(error.contains("not filled"), "{error}");
        assert!(error.contains("status endpoint unavailable"), "{error}");
    }

    #[tokio::test(start_paused = true)]
    async fn partial_fills_proceed_on_executed_quantity() {
        let (exchange, cache, engine) = engine();
        exchange.partial_fill(0.5);
        let done = engine
            .execute_arbitrage(&opportunity(&cache), "bot", false)
            .unwrap()
            .completion
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.legs.len(), 3);
        assert!(done.legs.iter().all(|l| l.status == OrderStatus::PartiallyFilled));
        assert_approx_eq!(done.legs[0].executed_qty, 500.0, 1e-9);
        let placed = exchange.placed();
        assert_approx_eq!(placed[1].quantity, 49_950.0, 1e-6);

        assert_eq!(engine.cancel_resting_orders(&done.id).await.unwrap(), 3);
        assert_eq!(exchange.cancelled(), vec!["mock-1", "mock-2", "mock-3"]);
        let after = engine.get_execution(&done.id).unwrap();
        assert!(after.legs.iter().all(|l| l.status == OrderStatus::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_order_fails_its_leg() {
        let (exchange, cache, engine) = engine();
        exchange.report_status(OrderStatus::Rejected);
        let done = engine
            .execute_arbitrage(&opportunity(&cache), "bot", false)
            .unwrap()
            .completion
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(done.failed_leg, Some(1));
        assert_eq!(exchange.calls().place_order, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fills_after_a_few_polls_proceed() {
        let (exchange, cache, engine) = engine();
        exchange.fill_after_polls(3);
        let done = engine
            .execute_arbitrage(&opportunity(&cache), "bot", false)
            .unwrap()
            .completion
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(exchange.calls().get_order_status, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_withdraws_open_leg_and_is_terminal() {
        let (exchange, cache, engine) = engine();
        exchange.report_status(OrderStatus::New);
        let ticket = engine.execute_arbitrage(&opportunity(&cache), "bot", false).unwrap();
        let id = ticket.execution.id.clone();

        tokio::time::sleep(Duration::from_millis(750)).await;
        assert_eq!(engine.get_execution(&id).unwrap().status, ExecutionStatus::Executing);

        let cancelled = engine.cancel_execution(&id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert_eq!(cancelled.legs.len(), 1);
        assert_eq!(cancelled.legs[0].status, OrderStatus::Canceled);
        assert_eq!(ticket.completion.await.unwrap().status, ExecutionStatus::Cancelled);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let calls = exchange.calls();
        assert_eq!(calls.place_order, 1);
        assert_eq!(calls.cancel_order, 1);
        assert_eq!(exchange.cancelled(), vec!["mock-1"]);
        assert_eq!(engine.get_execution(&id).unwrap().status, ExecutionStatus::Cancelled);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_executions_cannot_be_cancelled() {
        let (_exchange, cache, engine) = engine();
        let done = engine
            .execute_arbitrage(&opportunity(&cache), "bot", true)
            .unwrap()
            .completion
            .await
            .unwrap();

        let err = engine.cancel_execution(&done.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(engine.get_execution(&done.id).unwrap().status, ExecutionStatus::Completed);
        assert!(matches!(
            engine.cancel_execution("missing").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn best_effort_unwind_reverses_filled_legs() {
        let (exchange, cache, engine) = engine_with(ExecutionConfig {
            unwind_policy: UnwindPolicy::BestEffort,
            ..ExecutionConfig::default()
        });
        exchange.fail_placement(2);
        let done = engine
            .execute_arbitrage(&opportunity(&cache), "bot", false)
            .unwrap()
            .completion
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(done.legs.len(), 1);
        assert_eq!(done.unwind_orders.len(), 1);
        let unwind = &done.unwind_orders[0];
        assert_eq!(unwind.symbol, "AB");
        assert_eq!(unwind.side, Side::Buy);
        assert_eq!(unwind.price, 101.0);
        assert_eq!(exchange.calls().place_order, 3);
        assert_eq!(exchange.calls().cancel_order, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn min_notional_violation_fails_before_placement() {
        let (exchange, cache, engine) = engine();
        cache.set_symbol_meta(vec![SymbolMeta::new("AB", "A", "B").with_min_notional(1e9)]);
        let done = engine
            .execute_arbitrage(&opportunity(&cache), "bot", false)
            .unwrap()
            .completion
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(done.failed_leg, Some(1));
        assert_eq!(exchange.calls().place_order, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resting_orders_can_be_cleaned_up_after_failure() {
        let (exchange, cache, engine) = engine();
        exchange.report_status(OrderStatus::New);
        let done = engine
            .execute_arbitrage(&opportunity(&cache), "bot", false)
            .unwrap()
            .completion
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Failed);

        assert_eq!(engine.cancel_resting_orders(&done.id).await.unwrap(), 1);
        let after = engine.get_execution(&done.id).unwrap();
        assert_eq!(after.legs[0].status, OrderStatus::Canceled);
        assert_eq!(exchange.calls().cancel_order, 1);
    }
}
