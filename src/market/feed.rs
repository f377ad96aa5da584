use crate::exchange::Exchange;
use crate::market::MarketDataCache;
use crate::models::SymbolMeta;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Fetch the latest quote for every symbol in one round and merge the successes into
/// the cache. Returns how many symbols were refreshed.
pub async fn poll_quotes(
    exchange: &dyn Exchange,
    cache: &MarketDataCache,
    symbols: &[String],
) -> usize {
    let results = join_all(symbols.iter().map(|s| exchange.get_quote(s))).await;
    let mut quotes = Vec::with_capacity(results.len());
    for (symbol, res) in symbols.iter().zip(results) {
        match res {
            Ok(q) => quotes.push(q),
            Err(e) => warn!(%symbol, error = %e, "[FEED] quote fetch failed"),
        }
    }
    if quotes.is_empty() {
        return 0;
    }
    cache.refresh(quotes)
}

/// Spawn the timer-driven market refresh loop; it exits once `shutdown` flips to `true`.
pub fn spawn_quote_poller(
    exchange: Arc<dyn Exchange>,
    cache: Arc<MarketDataCache>,
    symbols: Vec<String>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        info!(symbols = symbols.len(), ?interval, "[FEED] quote poller started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    poll_quotes(exchange.as_ref(), &cache, &symbols).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("[FEED] quote poller stopped");
    })
}

/// Load trading constraints for each symbol, falling back to suffix inference when the
/// venue cannot provide them. Symbols that cannot be resolved either way are skipped.
pub async fn load_symbol_meta(
    exchange: &dyn Exchange,
    cache: &MarketDataCache,
    symbols: &[String],
) -> usize {
    let results = join_all(symbols.iter().map(|s| exchange.get_symbol_metadata(s))).await;
    let mut metas = Vec::with_capacity(symbols.len());
    for (symbol, res) in symbols.iter().zip(results) {
        match res {
            Ok(meta) => metas.push(meta),
            Err(e) => match SymbolMeta::infer(symbol) {
                Some(meta) => {
                    warn!(%symbol, error = %e, "[FEED] metadata unavailable, inferred from symbol");
                    metas.push(meta);
                }
                None => warn!(%symbol, error = %e, "[FEED] metadata unavailable, symbol skipped"),
            },
        }
    }
    let loaded = metas.len();
    cache.set_symbol_meta(metas);
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Quote;
    use crate::testutil::MockExchange;

    #[tokio::test]
    async fn poll_refreshes_known_symbols_and_skips_failures() {
        let exchange = MockExchange::new();
        exchange.set_quote(Quote::new("BTCUSDT", 100.0, 101.0, 100.0, 5.0));
        let cache = MarketDataCache::new();

        let symbols = vec!["BTCUSDT".to_string(), "MISSING".to_string()];
        let refreshed = poll_quotes(&exchange, &cache, &symbols).await;

        assert_eq!(refreshed, 1);
        assert_eq!(cache.ask_price("BTCUSDT"), Some(101.0));
        assert!(cache.is_fresh(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn metadata_falls_back_to_inference() {
        let exchange = MockExchange::new();
        exchange.set_meta(SymbolMeta::new("ETHBTC", "ETH", "BTC").with_steps(0.001, 0.000_01));
        let cache = MarketDataCache::new();

        let symbols = vec!["ETHBTC".to_string(), "BNBUSDT".to_string(), "XYZ".to_string()];
        let loaded = load_symbol_meta(&exchange, &cache, &symbols).await;

        assert_eq!(loaded, 2);
        assert_eq!(cache.symbol_meta("ETHBTC").map(|m| m.step_size), Some(0.001));
        assert_eq!(cache.symbol_meta("BNBUSDT").map(|m| m.base_asset), Some("BNB".into()));
        assert!(cache.symbol_meta("XYZ").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_stops_on_shutdown() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_quote(Quote::new("BTCUSDT", 100.0, 101.0, 100.0, 5.0));
        let cache = Arc::new(MarketDataCache::new());
        let (tx, rx) = watch::channel(false);

        let handle = spawn_quote_poller(
            exchange.clone(),
            cache.clone(),
            vec!["BTCUSDT".into()],
            Duration::from_secs(1),
            rx,
        );
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(exchange.calls().get_quote >= 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(cache.get_quote("BTCUSDT").is_some());
    }
}
