//! Scripted exchange double shared by the unit tests.

use crate::errors::{AppError, Result};
use crate::exchange::Exchange;
use crate::models::{OrderHandle, OrderReport, OrderStatus, Quote, Side, SymbolMeta};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_quote: usize,
    pub get_symbol_metadata: usize,
    pub place_order: usize,
    pub get_order_status: usize,
    pub cancel_order: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
}

#[derive(Debug)]
struct MockState {
    quotes: HashMap<String, Quote>,
    meta: HashMap<String, SymbolMeta>,
    calls: CallCounts,
    placed: Vec<PlacedOrder>,
    cancelled: Vec<String>,
    /// 1-based placement attempts that fail.
    failing_placements: HashSet<usize>,
    /// Status reported for every order after placement.
    status: OrderStatus,
    /// Polls answered with `NEW` before `status` is reported.
    polls_before_status: usize,
    polls: HashMap<String, usize>,
    /// Share of the order reported as executed on a partial fill.
    partial_fraction: f64,
    status_queries_fail: bool,
}

pub struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                quotes: HashMap::new(),
                meta: HashMap::new(),
                calls: CallCounts::default(),
                placed: Vec::new(),
                cancelled: Vec::new(),
                failing_placements: HashSet::new(),
                status: OrderStatus::Filled,
                polls_before_status: 0,
                polls: HashMap::new(),
                partial_fraction: 1.0,
                status_queries_fail: false,
            }),
        }
    }

    pub fn set_quote(&self, quote: Quote) {
        self.state.lock().unwrap().quotes.insert(quote.symbol.clone(), quote);
    }

    pub fn set_meta(&self, meta: SymbolMeta) {
        self.state.lock().unwrap().meta.insert(meta.symbol.clone(), meta);
    }

    pub fn fail_placement(&self, attempt: usize) {
        self.state.lock().unwrap().failing_placements.insert(attempt);
    }

    pub fn report_status(&self, status: OrderStatus) {
        self.state.lock().unwrap().status = status;
    }

    /// Report every order as partially filled for `fraction` of its quantity.
    pub fn partial_fill(&self, fraction: f64) {
        let mut state = self.state.lock().unwrap();
        state.status = OrderStatus::PartiallyFilled;
        state.partial_fraction = fraction;
    }

    pub fn fail_status_queries(&self) {
        self.state.lock().unwrap().status_queries_fail = true;
    }

    pub fn fill_after_polls(&self, polls: usize) {
        self.state.lock().unwrap().polls_before_status = polls;
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().unwrap().calls
    }

    pub fn placed(&self) -> Vec<PlacedOrder> {
        self.state.lock().unwrap().placed.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        let mut state = self.state.lock().unwrap();
        state.calls.get_quote += 1;
        state
            .quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| AppError::NotFound(symbol.to_string()))
    }

    async fn get_symbol_metadata(&self, symbol: &str) -> Result<SymbolMeta> {
        let mut state = self.state.lock().unwrap();
        state.calls.get_symbol_metadata += 1;
        state
            .meta
            .get(symbol)
            .cloned()
            .ok_or_else(|| AppError::NotFound(symbol.to_string()))
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> Result<OrderHandle> {
        let mut state = self.state.lock().unwrap();
        state.calls.place_order += 1;
        let attempt = state.calls.place_order;
        if state.failing_placements.contains(&attempt) {
            return Err(AppError::Exchange(format!("placement {attempt} rejected")));
        }
        let order_id = format!("mock-{attempt}");
        state.placed.push(PlacedOrder {
            order_id: order_id.clone(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
        });
        Ok(OrderHandle {
            order_id,
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
            status: OrderStatus::New,
        })
    }

    async fn get_order_status(&self, _symbol: &str, order_id: &str) -> Result<OrderReport> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.calls.get_order_status += 1;
        if state.status_queries_fail {
            return Err(AppError::Exchange("status endpoint unavailable".into()));
        }
        let placed = state
            .placed
            .iter()
            .find(|o| o.order_id == order_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(order_id.to_string()))?;
        let polls = state.polls.entry(order_id.to_string()).or_default();
        *polls += 1;
        let status = if *polls > state.polls_before_status {
            state.status
        } else {
            OrderStatus::New
        };
        let executed = match status {
            OrderStatus::Filled => placed.quantity,
            OrderStatus::PartiallyFilled => placed.quantity * state.partial_fraction,
            _ => 0.0,
        };
        Ok(OrderReport {
            order_id: order_id.to_string(),
            status,
            executed_qty: executed,
            cumulative_quote_qty: executed * placed.price,
        })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.cancel_order += 1;
        state.cancelled.push(order_id.to_string());
        if state.status == OrderStatus::Filled && state.polls.contains_key(order_id) {
            return Err(AppError::Exchange(format!("order {order_id} already filled")));
        }
        Ok(())
    }
}
