use anyhow::Result;
use arbitrage_engine::{
    arbitrage::{OpportunityScanner, RiskScorer},
    bot::{BotCoordinator, BotDeps},
    cex,
    config::AppConfig,
    events::EventBus,
    exchange::{Exchange, PaperExchange},
    execution::TradeExecutionEngine,
    market::{self, MarketDataCache},
    utils,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const SUPERVISOR_INTERVAL: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let cfg = AppConfig::load()?;
    tracing::info!(
        symbols = cfg.symbols.len(),
        path_length = cfg.path_length,
        min_profit_pct = cfg.min_profit_percentage,
        simulate = cfg.bot_simulate,
        "[INIT] arbitrage-engine starting"
    );

    // Shared state ---------------------------------------------------------
    let cache = Arc::new(MarketDataCache::new());
    let venue = Arc::new(PaperExchange::new(
        cache.clone(),
        cfg.paper_balances.clone(),
        cfg.taker_fee_percentage,
    ));
    let loaded = market::load_symbol_meta(venue.as_ref(), &cache, &cfg.symbols).await;
    tracing::info!(loaded, "[INIT] symbol metadata ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Market feed ----------------------------------------------------------
    let feed_task = {
        let url = cfg.cex_ws_url.clone();
        let symbols = cfg.symbols.clone();
        let cache = cache.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                let feed =
                    cex::spawn_ticker_feed(&url, &symbols, cache.clone(), shutdown.clone()).await;
                match feed {
                    Ok(handle) => {
                        if let Err(e) = handle.await {
                            tracing::warn!(?e, "[CEX] ticker task aborted");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "[CEX] connect failed"),
                }
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    // Engine ---------------------------------------------------------------
    let events = EventBus::default();
    let exchange: Arc<dyn Exchange> = venue.clone();
    let engine = TradeExecutionEngine::new(
        exchange,
        cache.clone(),
        cfg.execution_config(),
        events.clone(),
    );
    let deps = BotDeps {
        cache: cache.clone(),
        scanner: Arc::new(OpportunityScanner::new(cache.clone(), cfg.scanner_config())),
        risk: Arc::new(RiskScorer::new(cache.clone(), cfg.risk_config())),
        executor: Arc::new(engine),
        events: events.clone(),
    };

    let coordinator = Arc::new(BotCoordinator::new(deps));
    let status = coordinator.start_bot(cfg.default_bot("default"))?;
    tracing::info!(
        bot_id = %status.bot_id,
        cadence_ms = status.cadence_ms,
        "[INIT] default bot started"
    );
    let supervisor = coordinator
        .clone()
        .spawn_supervisor(SUPERVISOR_INTERVAL, shutdown_rx.clone());

    // Heartbeat ------------------------------------------------------------
    let heartbeat = {
        let coordinator = coordinator.clone();
        let cache = cache.clone();
        let venue = venue.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for status in coordinator.get_active_bots() {
                            let stats = &status.statistics;
                            tracing::info!(
                                bot_id = %status.bot_id,
                                running = status.running,
                                trades = stats.total_trades,
                                win_rate = stats.win_rate,
                                net = stats.total_profit - stats.total_loss,
                                quotes = cache.symbols().len(),
                                balances = ?venue.balances(),
                                "[HEARTBEAT] bot status"
                            );
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("[INIT] shutdown requested");
    coordinator.shutdown();
    shutdown_tx.send_replace(true);
    let _ = futures::join!(feed_task, supervisor, heartbeat);
    Ok(())
}
