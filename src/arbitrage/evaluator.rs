use super::types::{Opportunity, ScannerConfig, TradeStep};
use crate::errors::{AppError, Result};
use crate::market::CacheSnapshot;
use crate::models::{Side, SymbolMeta};
use chrono::Utc;
use uuid::Uuid;

pub const MIN_PATH_LENGTH: usize = 3;
pub const MAX_PATH_LENGTH: usize = 5;

/// Resolve a symbol's assets from the snapshot, inferring them from the name if needed.
pub fn resolve_meta(snapshot: &CacheSnapshot, symbol: &str) -> Option<SymbolMeta> {
    snapshot
        .meta(symbol)
        .cloned()
        .or_else(|| SymbolMeta::infer(symbol))
}

/// Chain a conversion of `config.initial_amount` units of `start_asset` through `path`.
///
/// Each leg trades the running balance at the touch (bid for SELL, ask for BUY) and
/// then deducts the taker fee from the leg's output. Unknown symbols, missing or
/// one-sided quotes, revisited assets and paths that do not return to `start_asset`
/// are all rejected; quotes older than `config.max_quote_age` yield `StaleData`.
///
/// Profitability is not checked here; see [`meets_threshold`].
pub fn evaluate_path(
    snapshot: &CacheSnapshot,
    path: &[String],
    start_asset: &str,
    config: &ScannerConfig,
) -> Result<Opportunity> {
    if !(MIN_PATH_LENGTH..=MAX_PATH_LENGTH).contains(&path.len()) {
        return Err(AppError::Validation(format!(
            "path length {} outside {MIN_PATH_LENGTH}..={MAX_PATH_LENGTH}",
            path.len()
        )));
    }
    let initial = config.initial_amount;
    if !(initial.is_finite() && initial > 0.0) {
        return Err(AppError::Validation(format!("invalid initial amount {initial}")));
    }
    let max_age = chrono::Duration::from_std(config.max_quote_age)
        .map_err(|e| AppError::Validation(format!("invalid quote age bound: {e}")))?;
    let fee = config.fee_fraction();

    let mut asset = start_asset.to_string();
    let mut visited = vec![asset.clone()];
    let mut balance = initial;
    let mut fee_free = initial;
    let mut steps = Vec::with_capacity(path.len());

    for (idx, symbol) in path.iter().enumerate() {
        let meta = resolve_meta(snapshot, symbol)
            .ok_or_else(|| AppError::Validation(format!("unknown symbol {symbol}")))?;
        let (side, next_asset) = if meta.base_asset == asset {
            (Side::Sell, meta.quote_asset.clone())
        } else if meta.quote_asset == asset {
            (Side::Buy, meta.base_asset.clone())
        } else {
            return Err(AppError::Validation(format!(
                "{symbol} does not trade {asset}"
            )));
        };
        let last_leg = idx + 1 == path.len();
        if next_asset == start_asset && !last_leg {
            return Err(AppError::Validation(format!(
                "path returns to {start_asset} before its last leg"
            )));
        }
        if next_asset != start_asset && visited.contains(&next_asset) {
            return Err(AppError::Validation(format!("path revisits {next_asset}")));
        }

        let quote = snapshot
            .quote(symbol)
            .ok_or_else(|| AppError::Validation(format!("no quote for {symbol}")))?;
        let age = snapshot.quote_age(quote);
        if age > max_age {
            return Err(AppError::StaleData {
                symbol: symbol.clone(),
                age_ms: age.num_milliseconds(),
            });
        }
        if !quote.is_tradeable() {
            return Err(AppError::Validation(format!(
                "{symbol} has no two-sided quote"
            )));
        }

        let (price, quantity, gross_out) = match side {
            Side::Sell => (quote.bid, balance, balance * quote.bid),
            Side::Buy => {
                let out = balance / quote.ask;
                (quote.ask, out, out)
            }
        };
        fee_free = match side {
            Side::Sell => fee_free * quote.bid,
            Side::Buy => fee_free / quote.ask,
        };
        let fee_amount = gross_out * fee;
        let amount = gross_out - fee_amount;

        steps.push(TradeStep {
            symbol: symbol.clone(),
            side,
            price,
            quantity,
            from_asset: asset.clone(),
            to_asset: next_asset.clone(),
            input_amount: balance,
            amount,
            fee: fee_amount,
            fee_percentage: fee,
        });

        balance = amount;
        visited.push(next_asset.clone());
        asset = next_asset;
    }

    if asset != start_asset {
        return Err(AppError::Validation(format!(
            "path ends in {asset}, not {start_asset}"
        )));
    }

    let final_amount = balance;
    let total_fees = fee_free - final_amount;
    let gross_profit = fee_free - initial;
    let slippage = initial * config.slippage_percentage / 100.0;
    let net_profit = gross_profit - total_fees - slippage;
    let profit_percentage = net_profit / initial * 100.0;
    if !(final_amount.is_finite() && profit_percentage.is_finite()) {
        return Err(AppError::Validation("non-finite path outcome".into()));
    }
    let estimated_execution_ms = config.estimated_execution_ms(path.len());

    Ok(Opportunity {
        id: Uuid::new_v4().to_string(),
        path: path.to_vec(),
        start_asset: start_asset.to_string(),
        steps,
        initial_amount: initial,
        final_amount,
        gross_profit,
        total_fees,
        slippage,
        net_profit,
        profit_percentage,
        confidence: confidence(profit_percentage, estimated_execution_ms),
        estimated_execution_ms,
        discovered_at: Utc::now(),
    })
}

pub fn meets_threshold(opportunity: &Opportunity, config: &ScannerConfig) -> bool {
    opportunity.profit_percentage >= config.min_profit_percentage
}

/// Heuristic score in 0..=100 favouring larger margins and faster paths.
pub fn confidence(profit_percentage: f64, estimated_execution_ms: u64) -> f64 {
    let mut score: f64 = 50.0;
    if profit_percentage > 0.5 {
        score += 30.0;
    } else if profit_percentage > 0.2 {
        score += 20.0;
    } else if profit_percentage > 0.1 {
        score += 10.0;
    }
    if estimated_execution_ms < 2_000 {
        score += 15.0;
    } else if estimated_execution_ms < 5_000 {
        score += 10.0;
    }
    score += 5.0;
    score.min(100.0)
}
