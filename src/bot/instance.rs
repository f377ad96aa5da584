use super::types::{BotConfig, BotStatistics, BotStatus, CycleOutcome};
use crate::arbitrage::{Opportunity, OpportunityScanner, RiskScorer};
use crate::errors::AppError;
use crate::events::{EngineEvent, EventBus};
use crate::execution::{ArbitrageExecutor, Execution};
use crate::market::MarketDataCache;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared collaborators every bot drives.
#[derive(Clone)]
pub struct BotDeps {
    pub cache: Arc<MarketDataCache>,
    pub scanner: Arc<OpportunityScanner>,
    pub risk: Arc<RiskScorer>,
    pub executor: Arc<dyn ArbitrageExecutor>,
    pub events: EventBus,
}

#[derive(Debug)]
struct BotState {
    config: BotConfig,
    running: bool,
    /// Ranking from this bot's latest scan.
    opportunities: Vec<Opportunity>,
    last_opportunity: Option<Opportunity>,
    last_execution: Option<Execution>,
    statistics: BotStatistics,
}

/// One strategy configuration and its periodic scan→risk→execute loop.
#[derive(Clone)]
pub struct BotInstance {
    id: String,
    deps: BotDeps,
    state: Arc<Mutex<BotState>>,
    stop_tx: Arc<watch::Sender<bool>>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BotInstance {
    pub fn new(config: BotConfig, deps: BotDeps) -> Self {
        let (stop_tx, _stop_rx) = watch::channel(false);
        Self {
            id: config.id.clone(),
            deps,
            state: Arc::new(Mutex::new(BotState {
                config,
                running: false,
                opportunities: Vec::new(),
                last_opportunity: None,
                last_execution: None,
                statistics: BotStatistics::default(),
            })),
            stop_tx: Arc::new(stop_tx),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> BotConfig {
        self.lock().config.clone()
    }

    /// Running flag set and loop task alive.
    pub fn is_running(&self) -> bool {
        let running = self.lock().running;
        running && self.lock_handle().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ranked opportunities found by this bot's most recent scan.
    pub fn opportunities(&self) -> Vec<Opportunity> {
        self.lock().opportunities.clone()
    }

    pub fn last_execution(&self) -> Option<Execution> {
        self.lock().last_execution.clone()
    }

    pub fn statistics(&self) -> BotStatistics {
        self.lock().statistics.clone()
    }

    pub fn status(&self) -> BotStatus {
        let running = self.is_running();
        let state = self.lock();
        BotStatus {
            bot_id: self.id.clone(),
            name: state.config.name.clone(),
            running,
            simulate: state.config.simulate,
            cadence_ms: state.config.cadence.as_millis() as u64,
            last_opportunity: state.last_opportunity.clone(),
            last_execution: state.last_execution.clone(),
            statistics: state.statistics.clone(),
        }
    }

    pub fn set_cadence(&self, cadence: Duration) {
        self.lock().config.cadence = cadence;
        info!(bot_id = %self.id, cadence_ms = cadence.as_millis() as u64, "[BOT] cadence updated");
    }

    pub fn switch_mode(&self, simulate: bool) {
        self.lock().config.simulate = simulate;
        info!(bot_id = %self.id, simulate, "[BOT] mode switched");
    }

    /// Start the periodic loop; a no-op when it is already running.
    pub fn start(&self) {
        if self.is_running() {
            return;
        }
        self.stop_tx.send_replace(false);
        self.lock().running = true;

        let bot = self.clone();
        let mut stop = self.stop_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let cadence = bot.lock().config.cadence;
                tokio::select! {
                    _ = tokio::time::sleep(cadence) => {
                        let outcome = bot.run_cycle();
                        debug!(bot_id = %bot.id, ?outcome, "[BOT] cycle finished");
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(bot_id = %bot.id, "[BOT] loop exited");
        });
        if let Some(previous) = self.lock_handle().replace(handle) {
            previous.abort();
        }
        info!(bot_id = %self.id, "[BOT] started");
    }

    pub fn stop(&self) {
        self.lock().running = false;
        self.stop_tx.send_replace(true);
        info!(bot_id = %self.id, "[BOT] stopped");
    }

    /// One scan→risk→execute pass. Stale data and empty scans are quiet no-ops.
    pub fn run_cycle(&self) -> CycleOutcome {
        let config = self.config();
        if !self.deps.cache.is_fresh(config.freshness) {
            debug!(bot_id = %self.id, "[BOT] market data stale, cycle skipped");
            return CycleOutcome::StaleData;
        }

        let ranking = self.deps.scanner.scan_with(&config.scanner);
        let best = ranking.first().cloned();
        self.lock().opportunities = ranking;
        let Some(best) = best else {
            debug!(bot_id = %self.id, "[BOT] no opportunity");
            return CycleOutcome::NoOpportunity;
        };
        self.lock().last_opportunity = Some(best.clone());
        self.deps.events.publish(EngineEvent::OpportunityFound {
            bot_id: self.id.clone(),
            opportunity: best.clone(),
        });

        match self.deps.risk.gate(&best, config.max_risk) {
            Ok(_) => {}
            Err(AppError::RiskExceeded { aggregate, ceiling }) => {
                debug!(bot_id = %self.id, opportunity_id = %best.id, "[BOT] execution skipped");
                self.deps.events.publish(EngineEvent::RiskRejected {
                    bot_id: self.id.clone(),
                    opportunity_id: best.id.clone(),
                    aggregate,
                    ceiling,
                });
                return CycleOutcome::RiskRejected { aggregate, ceiling };
            }
            Err(e) => {
                warn!(bot_id = %self.id, error = %e, "[BOT] risk assessment failed");
                return CycleOutcome::ExecutorError(e.to_string());
            }
        }

        match self
            .deps
            .executor
            .execute_arbitrage(&best, &self.id, config.simulate)
        {
            Ok(ticket) => {
                let execution_id = ticket.execution.id.clone();
                self.lock().last_execution = Some(ticket.execution);
                let bot = self.clone();
                let completion = ticket.completion;
                tokio::spawn(async move {
                    if let Ok(done) = completion.await {
                        bot.fold_execution(done);
                    }
                });
                CycleOutcome::Dispatched { execution_id }
            }
            Err(AppError::ConcurrencyLimit { limit }) => {
                info!(bot_id = %self.id, limit, "[BOT] executor at capacity");
                CycleOutcome::AdmissionRejected
            }
            Err(e) => {
                warn!(bot_id = %self.id, error = %e, "[BOT] execution request failed");
                CycleOutcome::ExecutorError(e.to_string())
            }
        }
    }

    /// Fold a finished execution into the statistics. It becomes the latest execution
    /// unless a newer one was dispatched in the meantime.
    pub fn fold_execution(&self, execution: Execution) {
        let mut state = self.lock();
        state.statistics.record(&execution);
        info!(
            bot_id = %self.id,
            execution_id = %execution.id,
            status = %execution.status,
            profit = execution.actual_profit,
            "[BOT] execution folded"
        );
        let superseded = state.last_execution.as_ref().is_some_and(|latest| {
            latest.id != execution.id && latest.started_at > execution.started_at
        });
        if !superseded {
            state.last_execution = Some(execution);
        }
    }

    #[cfg(test)]
    pub(crate) fn crash(&self) {
        if let Some(handle) = self.lock_handle().as_ref() {
            handle.abort();
        }
        self.lock().running = false;
    }
}
