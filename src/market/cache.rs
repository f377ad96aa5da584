use crate::models::{DEFAULT_STEP, Quote, SymbolMeta};
use crate::utils::round_down_to_step;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct CacheState {
    quotes: HashMap<String, Quote>,
    meta: HashMap<String, SymbolMeta>,
    last_refresh: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the cache handed to the scanner.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub quotes: HashMap<String, Quote>,
    pub meta: HashMap<String, SymbolMeta>,
    pub taken_at: DateTime<Utc>,
}

impl CacheSnapshot {
    pub fn quote(&self, symbol: &str) -> Option<&Quote> {
        self.quotes.get(symbol)
    }

    pub fn meta(&self, symbol: &str) -> Option<&SymbolMeta> {
        self.meta.get(symbol)
    }

    /// Age of a quote relative to the moment the snapshot was taken.
    pub fn quote_age(&self, quote: &Quote) -> chrono::Duration {
        self.taken_at - quote.updated_at
    }
}

/// Latest quote per trading pair plus the symbol constraints needed to place orders.
///
/// Readers and the refresh writer share one `RwLock`; a refresh batch is applied
/// under a single write guard so no reader ever observes a half-written quote.
#[derive(Debug, Default)]
pub struct MarketDataCache {
    state: RwLock<CacheState>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge a batch of quotes, stamping each one and the cache with the current time.
    /// Returns how many quotes were accepted.
    pub fn refresh<I>(&self, quotes: I) -> usize
    where
        I: IntoIterator<Item = Quote>,
    {
        self.refresh_at(quotes, Utc::now())
    }

    /// Like [`refresh`](Self::refresh) with an explicit timestamp.
    pub fn refresh_at<I>(&self, quotes: I, at: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = Quote>,
    {
        let mut state = self.write();
        let mut accepted = 0;
        for mut quote in quotes {
            if !quote.is_consistent() {
                warn!(
                    symbol = %quote.symbol,
                    bid = quote.bid,
                    ask = quote.ask,
                    "[FEED] rejected inconsistent quote"
                );
                continue;
            }
            quote.updated_at = at;
            state.quotes.insert(quote.symbol.clone(), quote);
            accepted += 1;
        }
        state.last_refresh = Some(at);
        debug!(accepted, total = state.quotes.len(), "[FEED] cache refreshed");
        accepted
    }

    pub fn set_symbol_meta<I>(&self, metas: I)
    where
        I: IntoIterator<Item = SymbolMeta>,
    {
        let mut state = self.write();
        for meta in metas {
            state.meta.insert(meta.symbol.clone(), meta);
        }
    }

    pub fn get_quote(&self, symbol: &str) -> Option<Quote> {
        self.read().quotes.get(symbol).cloned()
    }

    pub fn symbol_meta(&self, symbol: &str) -> Option<SymbolMeta> {
        self.read().meta.get(symbol).cloned()
    }

    /// Symbols with a cached quote, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.read().quotes.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.read().last_refresh
    }

    /// True when the last refresh happened less than `max_age` ago.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.is_fresh_at(max_age, Utc::now())
    }

    pub fn is_fresh_at(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_refresh() else {
            return false;
        };
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return true;
        };
        now - last < max_age
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let state = self.read();
        CacheSnapshot {
            quotes: state.quotes.clone(),
            meta: state.meta.clone(),
            taken_at: Utc::now(),
        }
    }

    pub fn bid_price(&self, symbol: &str) -> Option<f64> {
        self.get_quote(symbol).map(|q| q.bid)
    }

    pub fn ask_price(&self, symbol: &str) -> Option<f64> {
        self.get_quote(symbol).map(|q| q.ask)
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.get_quote(symbol).map(|q| q.last)
    }

    pub fn mid_price(&self, symbol: &str) -> Option<f64> {
        self.get_quote(symbol).map(|q| q.mid())
    }

    pub fn spread(&self, symbol: &str) -> Option<f64> {
        self.get_quote(symbol).map(|q| q.spread())
    }

    pub fn spread_percentage(&self, symbol: &str) -> Option<f64> {
        self.get_quote(symbol).map(|q| q.spread_percentage())
    }

    /// Snap a quantity down to the symbol's lot step (1e-8 without metadata).
    pub fn round_quantity(&self, symbol: &str, quantity: f64) -> f64 {
        let step = self
            .symbol_meta(symbol)
            .map(|m| m.step_size)
            .filter(|s| *s > 0.0)
            .unwrap_or(DEFAULT_STEP);
        round_down_to_step(quantity, step)
    }

    /// Snap a price down to the symbol's tick (1e-8 without metadata).
    pub fn round_price(&self, symbol: &str, price: f64) -> f64 {
        let tick = self
            .symbol_meta(symbol)
            .map(|m| m.tick_size)
            .filter(|s| *s > 0.0)
            .unwrap_or(DEFAULT_STEP);
        round_down_to_step(price, tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn refresh_merges_and_rejects_crossed_quotes() {
        let cache = MarketDataCache::new();
        let accepted = cache.refresh(vec![
            Quote::new("BTCUSDT", 100.0, 101.0, 100.5, 10.0),
            Quote::new("ETHUSDT", 11.0, 10.0, 10.5, 10.0),
        ]);
        assert_eq!(accepted, 1);
        assert!(cache.get_quote("ETHUSDT").is_none());

        cache.refresh(vec![Quote::new("ETHUSDT", 10.0, 10.1, 10.0, 5.0)]);
        assert_eq!(cache.symbols(), vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(cache.bid_price("BTCUSDT"), Some(100.0));
        assert_eq!(cache.mid_price("BTCUSDT"), Some(100.5));
        assert_eq!(cache.get_quote("DOGEUSDT"), None);
    }

    #[test]
    fn freshness_tracks_last_refresh() {
        let cache = MarketDataCache::new();
        assert!(!cache.is_fresh(Duration::from_secs(10)));

        let then = Utc::now() - chrono::Duration::seconds(30);
        cache.refresh_at(vec![Quote::new("BTCUSDT", 1.0, 1.1, 1.0, 1.0)], then);
        assert!(!cache.is_fresh(Duration::from_secs(10)));
        assert!(cache.is_fresh(Duration::from_secs(60)));

        cache.refresh(Vec::new());
        assert!(cache.is_fresh(Duration::from_secs(10)));
    }

    #[test]
    fn rounding_uses_metadata_or_default_precision() {
        let cache = MarketDataCache::new();
        cache.set_symbol_meta(vec![
            SymbolMeta::new("BTCUSDT", "BTC", "USDT").with_steps(0.001, 0.01),
        ]);
        assert_eq!(cache.round_quantity("BTCUSDT", 0.123_456), 0.123);
        assert_eq!(cache.round_price("BTCUSDT", 27_123.456), 27_123.45);
        assert_eq!(cache.round_quantity("UNKNOWN", 0.123_456_789_9), 0.123_456_78);

        for value in [0.123_456, 1.0 / 7.0, 5.5] {
            let once = cache.round_quantity("BTCUSDT", value);
            assert_eq!(cache.round_quantity("BTCUSDT", once), once);
        }
    }

    #[test]
    fn readers_never_see_partial_batches() {
        let cache = Arc::new(MarketDataCache::new());
        cache.refresh(vec![
            Quote::new("AB", 1.0, 1.0, 1.0, 0.0),
            Quote::new("BC", 1.0, 1.0, 1.0, 0.0),
        ]);

        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 1..200 {
                    let p = i as f64;
                    cache.refresh(vec![
                        Quote::new("AB", p, p, p, 0.0),
                        Quote::new("BC", p, p, p, 0.0),
                    ]);
                }
            })
        };
        for _ in 0..200 {
            let snap = cache.snapshot();
            assert_eq!(snap.quote("AB").map(|q| q.bid), snap.quote("BC").map(|q| q.bid));
        }
        writer.join().unwrap();
    }
}
