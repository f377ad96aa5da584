//! Typed notifications published by the engine for upstream consumers.

use crate::arbitrage::Opportunity;
use crate::bot::BotConflict;
use crate::execution::Execution;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// One concrete payload per message kind, serialized as `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    OpportunityFound {
        bot_id: String,
        opportunity: Opportunity,
    },
    RiskRejected {
        bot_id: String,
        opportunity_id: String,
        aggregate: f64,
        ceiling: f64,
    },
    ExecutionUpdated(Execution),
    BotStarted {
        bot_id: String,
    },
    BotStopped {
        bot_id: String,
    },
    BotRestarted {
        bot_id: String,
    },
    ConflictDetected(BotConflict),
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::OpportunityFound { .. } => "opportunity_found",
            EngineEvent::RiskRejected { .. } => "risk_rejected",
            EngineEvent::ExecutionUpdated(_) => "execution_updated",
            EngineEvent::BotStarted { .. } => "bot_started",
            EngineEvent::BotStopped { .. } => "bot_stopped",
            EngineEvent::BotRestarted { .. } => "bot_restarted",
            EngineEvent::ConflictDetected(_) => "conflict_detected",
        }
    }
}

/// Fan-out channel for [`EngineEvent`]s. Publishing with no subscriber is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        let kind = event.kind();
        let receivers = self.tx.send(event).unwrap_or(0);
        trace!(kind, receivers, "event published");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_adjacent_tagging() {
        let event = EngineEvent::BotStarted {
            bot_id: "bot-1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "bot_started");
        assert_eq!(json["payload"]["bot_id"], "bot-1");

        let back: EngineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        bus.publish(EngineEvent::BotStopped { bot_id: "early".into() });

        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::BotRestarted { bot_id: "bot-2".into() });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind(), "bot_restarted");
    }
}
