use crate::errors::Result;
use crate::market::MarketDataCache;
use crate::models::Quote;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use url::Url;

pub const BINANCE_WS_ENDPOINT: &str = "wss://stream.binance.com:9443/ws";

/// One entry of the `!ticker@arr` all-market 24h ticker stream.
#[derive(Debug, Deserialize)]
struct TickerMsg {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "a")]
    ask: String,
    #[serde(rename = "c")]
    last: String,
    #[serde(rename = "v")]
    volume: String,
}

impl TickerMsg {
    fn into_quote(self) -> Option<Quote> {
        Some(Quote::new(
            self.symbol,
            self.bid.parse().ok()?,
            self.ask.parse().ok()?,
            self.last.parse().ok()?,
            self.volume.parse().ok()?,
        ))
    }
}

fn parse_tickers(txt: &str) -> Option<Vec<Quote>> {
    let parsed: Vec<TickerMsg> = match serde_json::from_str(txt) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "[CEX] ticker JSON parse failed");
            return None;
        }
    };
    let quotes: Vec<Quote> = parsed.into_iter().filter_map(TickerMsg::into_quote).collect();
    (!quotes.is_empty()).then_some(quotes)
}

/// Returns an asynchronous stream of quote batches from the all-market ticker stream.
pub async fn connect_and_stream(
    ws_url: &str,
) -> Result<impl Stream<Item = Vec<Quote>> + use<>> {
    let url = Url::parse(&format!("{}/!ticker@arr", ws_url.trim_end_matches('/')))?;

    let (ws_stream, _resp) = connect_async(url).await?;

    let mapped = ws_stream.filter_map(|msg_res| async {
        match msg_res {
            Ok(msg) if msg.is_text() => {
                let txt = match msg.into_text() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, "[CEX] text extraction failed");
                        return None;
                    }
                };
                parse_tickers(&txt)
            }
            Err(e) => {
                warn!(error = %e, "[CEX] websocket message error");
                None
            }
            _ => None,
        }
    });
    Ok(mapped)
}

/// Keep only the tracked symbols; an empty filter keeps everything.
fn retain_tracked(quotes: Vec<Quote>, tracked: &HashSet<String>) -> Vec<Quote> {
    if tracked.is_empty() {
        return quotes;
    }
    quotes
        .into_iter()
        .filter(|q| tracked.contains(&q.symbol))
        .collect()
}

/// Spawn the ticker watcher that refreshes `cache` with every batch until shutdown.
pub async fn spawn_ticker_feed(
    ws_url: &str,
    symbols: &[String],
    cache: Arc<MarketDataCache>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>> {
    let stream = connect_and_stream(ws_url).await?;
    let tracked: HashSet<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
    info!(url = ws_url, tracked = tracked.len(), "[CEX] ticker stream connected");

    let handle = tokio::spawn(async move {
        futures::pin_mut!(stream);
        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(batch) => {
                        let batch = retain_tracked(batch, &tracked);
                        if !batch.is_empty() {
                            cache.refresh(batch);
                        }
                    }
                    None => {
                        warn!("[CEX] ticker stream ended");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;

    #[test]
    fn parse_ticker_message_shape() {
        let raw = concat!(
            r#"[{"e":"24hrTicker","E":1,"s":"ETHBTC","c":"0.0510","#,
            r#""b":"0.0509","B":"3","a":"0.0511","A":"4","v":"12345.6"}]"#,
        );
        let quotes = parse_tickers(raw).expect("ticker array should parse");
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "ETHBTC");
        assert_eq!(quotes[0].bid, 0.0509);
        assert_eq!(quotes[0].ask, 0.0511);
        assert_eq!(quotes[0].volume, 12_345.6);
    }

    #[test]
    fn stream_filters_invalid_numbers_and_untracked_symbols() {
        let raw = r#"[
            {"s":"BTCUSDT","c":"45005","b":"45000","a":"45010","v":"900"},
            {"s":"ETHUSDT","c":"bad","b":"2500","a":"2501","v":"900"},
            {"s":"DOGEUSDT","c":"0.1","b":"0.1","a":"0.11","v":"900"}
        ]"#;
        let quotes = parse_tickers(raw).expect("valid entries remain");
        assert_eq!(quotes.len(), 2);

        let tracked = HashSet::from(["BTCUSDT".to_string()]);
        let kept = retain_tracked(quotes, &tracked);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].symbol, "BTCUSDT");

        assert!(parse_tickers("{}").is_none());
    }

    #[tokio::test]
    async fn connect_result_outlives_endpoint_argument() {
        let result = {
            let endpoint = String::from("not a websocket endpoint");
            connect_and_stream(&endpoint).await
        };
        let err = result.err().expect("unparseable endpoint is rejected");
        assert!(matches!(err, AppError::UrlParse(_)), "{err}");
    }
}
