//! Strategy bots and their coordinator.
//!
//! Responsibilities:
//! • Run one periodic scan→risk→execute loop per bot configuration.
//! • Fold finished executions into per-bot statistics.
//! • Report cross-bot symbol overlap and restart stalled loops.

pub mod coordinator;
pub mod instance;
pub mod types;

pub use coordinator::BotCoordinator;
pub use instance::{BotDeps, BotInstance};
pub use types::{BotConfig, BotConflict, BotStatistics, BotStatus, CycleOutcome};
