//! Configuration loader and application settings.

use crate::arbitrage::{RiskConfig, ScannerConfig};
use crate::bot::BotConfig;
use crate::cex::BINANCE_WS_ENDPOINT;
use crate::errors::{AppError, Result};
use crate::execution::{ExecutionConfig, UnwindPolicy};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SYMBOLS: &str = "BTCUSDT,ETHUSDT,ETHBTC,BNBUSDT,BNBBTC,BNBETH";

/// Consolidated application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Pair universe tracked by the feed and scanned by the default bot.
    pub symbols: Vec<String>,
    /// Assets a cycle may start from; empty means any.
    pub start_assets: Vec<String>,
    pub path_length: usize,
    pub min_profit_percentage: f64,
    pub taker_fee_percentage: f64,
    pub slippage_percentage: f64,
    pub initial_amount: f64,
    pub leg_latency_ms: u64,
    pub max_quote_age: Duration,
    /// Aggregate risk ceiling.
    pub max_risk: f64,
    pub max_concurrent_executions: usize,
    pub order_poll_interval: Duration,
    pub order_timeout: Duration,
    pub unwind_policy: UnwindPolicy,
    pub bot_cadence: Duration,
    pub bot_simulate: bool,
    /// WebSocket endpoint for the public ticker feed.
    pub cex_ws_url: String,
    /// Starting balances of the paper venue.
    pub paper_balances: HashMap<String, f64>,
}

impl AppConfig {
    /// Load configuration from environment variables. Missing keys take their defaults.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let path_length: usize = parse_or(&get, "PATH_LENGTH", 3)?;
        if !(3..=5).contains(&path_length) {
            return Err(AppError::Config(format!(
                "PATH_LENGTH must be between 3 and 5, got {path_length}"
            )));
        }
        let symbols = list(get("SYMBOLS").as_deref().unwrap_or(DEFAULT_SYMBOLS));
        if symbols.is_empty() {
            return Err(AppError::Config("SYMBOLS is empty".into()));
        }
        let unwind_policy = match get("UNWIND_POLICY") {
            Some(raw) => raw
                .parse::<UnwindPolicy>()
                .map_err(|e| AppError::Config(format!("UNWIND_POLICY: {e}")))?,
            None => UnwindPolicy::LeaveOpen,
        };
        let paper_balances =
            parse_balances(get("PAPER_BALANCES").as_deref().unwrap_or("USDT:10000"))?;

        Ok(Self {
            symbols,
            start_assets: list(get("START_ASSETS").as_deref().unwrap_or("USDT")),
            path_length,
            min_profit_percentage: parse_or(&get, "MIN_PROFIT_PCT", 0.1)?,
            taker_fee_percentage: parse_or(&get, "TAKER_FEE_PCT", 0.1)?,
            slippage_percentage: parse_or(&get, "SLIPPAGE_PCT", 0.05)?,
            initial_amount: positive(parse_or(&get, "INITIAL_AMOUNT", 1000.0)?, "INITIAL_AMOUNT")?,
            leg_latency_ms: parse_or(&get, "LEG_LATENCY_MS", 1000)?,
            max_quote_age: Duration::from_secs(parse_or(&get, "MAX_QUOTE_AGE_SECS", 10)?),
            max_risk: parse_or(&get, "MAX_RISK", 50.0)?,
            max_concurrent_executions: parse_or(&get, "MAX_CONCURRENT_EXECUTIONS", 5)?,
            order_poll_interval: Duration::from_millis(parse_or(&get, "ORDER_POLL_MS", 500)?),
            order_timeout: Duration::from_secs(parse_or(&get, "ORDER_TIMEOUT_SECS", 30)?),
            unwind_policy,
            bot_cadence: Duration::from_secs(
                parse_or::<u64, _>(&get, "BOT_CADENCE_SECS", 5)?.max(1),
            ),
            bot_simulate: parse_or(&get, "BOT_SIMULATE", true)?,
            cex_ws_url: get("CEX_WS_URL").unwrap_or_else(|| BINANCE_WS_ENDPOINT.to_string()),
            paper_balances,
        })
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            path_length: self.path_length,
            symbols: self.symbols.clone(),
            start_assets: self.start_assets.clone(),
            initial_amount: self.initial_amount,
            min_profit_percentage: self.min_profit_percentage,
            taker_fee_percentage: self.taker_fee_percentage,
            slippage_percentage: self.slippage_percentage,
            leg_latency_ms: self.leg_latency_ms,
            max_quote_age: self.max_quote_age,
            ..ScannerConfig::default()
        }
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            max_risk: self.max_risk,
            ..RiskConfig::default()
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            max_concurrent: self.max_concurrent_executions,
            poll_interval: self.order_poll_interval,
            order_timeout: self.order_timeout,
            taker_fee_percentage: self.taker_fee_percentage,
            unwind_policy: self.unwind_policy,
            ..ExecutionConfig::default()
        }
    }

    /// Configuration of the bot started at boot.
    pub fn default_bot(&self, id: &str) -> BotConfig {
        let mut bot = BotConfig::new(id, self.scanner_config());
        bot.cadence = self.bot_cadence;
        bot.simulate = self.bot_simulate;
        bot.max_risk = self.max_risk;
        bot.freshness = self.max_quote_age;
        bot
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key}={raw:?}: {e}"))),
        None => Ok(default),
    }
}

fn positive(value: f64, key: &str) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(AppError::Config(format!("{key} must be positive, got {value}")))
    }
}

fn list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `ASSET:amount,ASSET:amount`.
pub fn parse_balances(raw: &str) -> Result<HashMap<String, f64>> {
    let mut balances = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (asset, amount) = entry.split_once(':').ok_or_else(|| {
            AppError::Config(format!("balance entry {entry:?} is not ASSET:amount"))
        })?;
        let amount: f64 = amount
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("balance for {asset}: {e}")))?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(AppError::Config(format!("balance for {asset} must be non-negative")));
        }
        balances.insert(asset.trim().to_ascii_uppercase(), amount);
    }
    Ok(balances)
}
