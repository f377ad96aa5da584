use crate::errors::{AppError, Result};
use crate::exchange::Exchange;
use crate::market::MarketDataCache;
use crate::models::{OrderHandle, OrderReport, OrderStatus, Quote, Side, SymbolMeta};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone)]
struct PaperOrder {
    symbol: String,
    base: String,
    quote: String,
    side: Side,
    price: f64,
    quantity: f64,
    status: OrderStatus,
    executed_qty: f64,
    cumulative_quote_qty: f64,
}

#[derive(Debug, Default)]
struct PaperState {
    balances: HashMap<String, f64>,
    orders: HashMap<String, PaperOrder>,
    next_id: u64,
    commission_paid: HashMap<String, f64>,
}

/// In-process venue that fills limit orders against the shared quote cache.
///
/// A marketable order fills in full at the touch (ask for BUY, bid for SELL);
/// anything else rests as `NEW` with its funds locked and is re-checked on every
/// status query. Commission is charged on the received asset.
pub struct PaperExchange {
    cache: Arc<MarketDataCache>,
    fee_fraction: f64,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    /// `fee_percentage` is in percent, e.g. `0.1` for 0.1 %.
    pub fn new(
        cache: Arc<MarketDataCache>,
        balances: HashMap<String, f64>,
        fee_percentage: f64,
    ) -> Self {
        Self {
            cache,
            fee_fraction: fee_percentage / 100.0,
            state: Mutex::new(PaperState {
                balances,
                ..PaperState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn balance(&self, asset: &str) -> f64 {
        self.lock().balances.get(asset).copied().unwrap_or(0.0)
    }

    pub fn balances(&self) -> HashMap<String, f64> {
        self.lock().balances.clone()
    }

    pub fn commission_paid(&self, asset: &str) -> f64 {
        self.lock().commission_paid.get(asset).copied().unwrap_or(0.0)
    }

    fn resolve_meta(&self, symbol: &str) -> Result<SymbolMeta> {
        self.cache
            .symbol_meta(symbol)
            .or_else(|| SymbolMeta::infer(symbol))
            .ok_or_else(|| AppError::Validation(format!("unknown symbol {symbol}")))
    }

    /// Fill `order` if the current quote crosses its limit.
    fn try_fill(state: &mut PaperState, order_id: &str, quote: &Quote, fee_fraction: f64) {
        let Some(order) = state.orders.get_mut(order_id) else {
            return;
        };
        if order.status != OrderStatus::New {
            return;
        }
        let (fill_price, marketable) = match order.side {
            Side::Buy => (quote.ask, quote.ask > 0.0 && quote.ask <= order.price),
            Side::Sell => (quote.bid, quote.bid > 0.0 && quote.bid >= order.price),
        };
        if !marketable {
            return;
        }
        order.status = OrderStatus::Filled;
        order.executed_qty = order.quantity;
        order.cumulative_quote_qty = order.quantity * fill_price;
        let order = order.clone();

        let (received_asset, received, refund_asset, refund) = match order.side {
            Side::Buy => (
                order.base.clone(),
                order.quantity,
                order.quote.clone(),
                order.quantity * (order.price - fill_price),
            ),
            Side::Sell => (
                order.quote.clone(),
                order.cumulative_quote_qty,
                order.base.clone(),
                0.0,
            ),
        };
        let commission = received * fee_fraction;
        *state.balances.entry(received_asset.clone()).or_default() += received - commission;
        *state.balances.entry(refund_asset).or_default() += refund;
        *state.commission_paid.entry(received_asset).or_default() += commission;
        debug!(
            order_id,
            symbol = %order.symbol,
            side = %order.side,
            fill_price,
            "[PAPER] order filled"
        );
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        self.cache
            .get_quote(symbol)
            .ok_or_else(|| AppError::NotFound(format!("no quote for {symbol}")))
    }

    async fn get_symbol_metadata(&self, symbol: &str) -> Result<SymbolMeta> {
        self.resolve_meta(symbol)
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> Result<OrderHandle> {
        if !(quantity > 0.0 && price > 0.0) {
            return Err(AppError::Exchange(format!(
                "invalid order {side} {quantity} {symbol} @ {price}"
            )));
        }
        let meta = self.resolve_meta(symbol)?;
        let quote = self.get_quote(symbol).await?;

        let mut state = self.lock();
        let (lock_asset, lock_amount) = match side {
            Side::Buy => (meta.quote_asset.clone(), quantity * price),
            Side::Sell => (meta.base_asset.clone(), quantity),
        };
        let available = state.balances.get(&lock_asset).copied().unwrap_or(0.0);
        if available + 1e-12 < lock_amount {
            return Err(AppError::Exchange(format!(
                "insufficient {lock_asset} balance: have {available}, need {lock_amount}"
            )));
        }
        *state.balances.entry(lock_asset).or_default() -= lock_amount;

        state.next_id += 1;
        let order_id = format!("paper-{}", state.next_id);
        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                symbol: symbol.to_string(),
                base: meta.base_asset,
                quote: meta.quote_asset,
                side,
                price,
                quantity,
                status: OrderStatus::New,
                executed_qty: 0.0,
                cumulative_quote_qty: 0.0,
            },
        );
        Self::try_fill(&mut state, &order_id, &quote, self.fee_fraction);
        let status = state.orders.get(&order_id).map_or(OrderStatus::New, |o| o.status);

        Ok(OrderHandle {
            order_id,
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
            status,
        })
    }

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderReport> {
        let quote = self.cache.get_quote(symbol);
        let mut state = self.lock();
        if let Some(quote) = quote {
            Self::try_fill(&mut state, order_id, &quote, self.fee_fraction);
        }
        let order = state
            .orders
            .get(order_id)
            .filter(|o| o.symbol == symbol)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} on {symbol}")))?;
        Ok(OrderReport {
            order_id: order_id.to_string(),
            status: order.status,
            executed_qty: order.executed_qty,
            cumulative_quote_qty: order.cumulative_quote_qty,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let mut state = self.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .filter(|o| o.symbol == symbol)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} on {symbol}")))?;
        match order.status {
            OrderStatus::New => {}
            OrderStatus::Canceled => return Ok(()),
            other => {
                return Err(AppError::Exchange(format!(
                    "order {order_id} cannot be canceled in state {other:?}"
                )));
            }
        }
        order.status = OrderStatus::Canceled;
        let (asset, amount) = match order.side {
            Side::Buy => (order.quote.clone(), order.quantity * order.price),
            Side::Sell => (order.base.clone(), order.quantity),
        };
        *state.balances.entry(asset).or_default() += amount;
        Ok(())
    }
}
