//! Multi-leg trade execution.
//!
//! Responsibilities:
//! • Admit opportunities under a fixed concurrency ceiling.
//! • Place leg orders strictly in path order and poll each one to a fill or a timeout.
//! • Record realised amounts, fees and slippage; support cancellation and optional unwind.

pub mod engine;
pub mod types;

pub use engine::{ArbitrageExecutor, ExecutionTicket, TradeExecutionEngine};
pub use types::{Execution, ExecutionConfig, ExecutionStatus, LegOrder, UnwindPolicy};
