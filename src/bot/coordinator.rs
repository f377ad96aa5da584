use super::instance::{BotDeps, BotInstance};
use super::types::{BotConfig, BotConflict, BotStatus};
use crate::errors::{AppError, Result};
use crate::events::EngineEvent;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Owns the active bot set; bots are created on start and destroyed on stop.
pub struct BotCoordinator {
    deps: BotDeps,
    bots: Mutex<BTreeMap<String, BotInstance>>,
}

impl BotCoordinator {
    pub fn new(deps: BotDeps) -> Self {
        Self {
            deps,
            bots: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BotInstance>> {
        self.bots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bot(&self, id: &str) -> Result<BotInstance> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("bot {id}")))
    }

    pub fn start_bot(&self, config: BotConfig) -> Result<BotStatus> {
        if config.cadence.is_zero() {
            return Err(AppError::Validation(format!("bot {} has zero cadence", config.id)));
        }
        let instance = {
            let mut bots = self.lock();
            if bots.contains_key(&config.id) {
                return Err(AppError::InvalidState(format!("bot {} already running", config.id)));
            }
            let instance = BotInstance::new(config, self.deps.clone());
            bots.insert(instance.id().to_string(), instance.clone());
            instance
        };
        instance.start();
        self.deps.events.publish(EngineEvent::BotStarted {
            bot_id: instance.id().to_string(),
        });
        Ok(instance.status())
    }

    pub fn stop_bot(&self, id: &str) -> Result<BotStatus> {
        let instance = self
            .lock()
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("bot {id}")))?;
        instance.stop();
        self.deps.events.publish(EngineEvent::BotStopped {
            bot_id: id.to_string(),
        });
        Ok(instance.status())
    }

    /// Status of every active bot, ordered by id.
    pub fn get_active_bots(&self) -> Vec<BotStatus> {
        let bots: Vec<BotInstance> = self.lock().values().cloned().collect();
        bots.iter().map(BotInstance::status).collect()
    }

    pub fn get_bot_status(&self, id: &str) -> Result<BotStatus> {
        Ok(self.bot(id)?.status())
    }

    pub fn set_cadence(&self, id: &str, cadence: Duration) -> Result<()> {
        if cadence.is_zero() {
            return Err(AppError::Validation("cadence must be positive".into()));
        }
        self.bot(id)?.set_cadence(cadence);
        Ok(())
    }

    pub fn switch_mode(&self, id: &str, simulate: bool) -> Result<()> {
        self.bot(id)?.switch_mode(simulate);
        Ok(())
    }

    /// Pairs of bots whose latest executions share a trading symbol. Informational only.
    pub fn check_conflicts(&self) -> Vec<BotConflict> {
        let latest: Vec<(String, Vec<String>)> = self
            .lock()
            .values()
            .filter_map(|bot| bot.last_execution().map(|e| (bot.id().to_string(), e.path)))
            .collect();

        let mut conflicts = BTreeSet::new();
        for (i, (bot_a, path_a)) in latest.iter().enumerate() {
            for (bot_b, path_b) in latest.iter().skip(i + 1) {
                for symbol in path_a.iter().filter(|s| path_b.contains(*s)) {
                    conflicts.insert(BotConflict {
                        bot_a: bot_a.clone(),
                        bot_b: bot_b.clone(),
                        symbol: symbol.clone(),
                    });
                }
            }
        }

        let conflicts: Vec<BotConflict> = conflicts.into_iter().collect();
        for conflict in &conflicts {
            info!(
                bot_a = %conflict.bot_a,
                bot_b = %conflict.bot_b,
                symbol = %conflict.symbol,
                "[COORD] bots overlap on symbol"
            );
            self.deps
                .events
                .publish(EngineEvent::ConflictDetected(conflict.clone()));
        }
        conflicts
    }

    /// Restart active bots whose loop stopped without being asked to. Returns their ids.
    pub fn balance_load(&self) -> Vec<String> {
        let stalled: Vec<BotInstance> = self
            .lock()
            .values()
            .filter(|bot| !bot.is_running())
            .cloned()
            .collect();

        let mut restarted = Vec::with_capacity(stalled.len());
        for bot in stalled {
            warn!(bot_id = %bot.id(), "[COORD] restarting stalled bot");
            bot.start();
            self.deps.events.publish(EngineEvent::BotRestarted {
                bot_id: bot.id().to_string(),
            });
            restarted.push(bot.id().to_string());
        }
        restarted
    }

    /// Stop and drop every bot.
    pub fn shutdown(&self) {
        let bots: Vec<BotInstance> = std::mem::take(&mut *self.lock()).into_values().collect();
        for bot in &bots {
            bot.stop();
            self.deps.events.publish(EngineEvent::BotStopped {
                bot_id: bot.id().to_string(),
            });
        }
        info!(stopped = bots.len(), "[COORD] all bots stopped");
    }

    /// Periodically run `balance_load` and `check_conflicts` until shutdown.
    pub fn spawn_supervisor(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let restarted = self.balance_load();
                        let conflicts = self.check_conflicts();
                        if !restarted.is_empty() || !conflicts.is_empty() {
                            info!(
                                restarted = restarted.len(),
                                conflicts = conflicts.len(),
                                "[COORD] supervision pass"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
