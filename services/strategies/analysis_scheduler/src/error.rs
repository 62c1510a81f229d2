//! Error types for the analysis scheduler

use crate::status::SchedulerStatus;
use state_context::ContextError;
use thiserror::Error;
use types::Timeframe;

#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("No strategies configured")]
    NoStrategies,

    #[error("No symbols configured")]
    NoSymbols,

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Scheduler already running (status: {0})")]
    AlreadyRunning(SchedulerStatus),

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: SchedulerStatus,
        to: SchedulerStatus,
    },

    #[error("Context unavailable: {0}")]
    Context(#[from] ContextError),

    #[error("Insufficient {timeframe} data for {symbol}: {available}/{required} bars")]
    InsufficientData {
        symbol: String,
        timeframe: Timeframe,
        available: usize,
        required: usize,
    },

    #[error("Strategy {strategy} failed on {symbol}: {reason}")]
    Strategy {
        strategy: String,
        symbol: String,
        reason: String,
    },

    #[error("Signal sink rejected {strategy} signal for {symbol}: {reason}")]
    Sink {
        strategy: String,
        symbol: String,
        reason: String,
    },

    #[error("Cycle {cycle} failed: {reason}")]
    CycleFailed { cycle: u64, reason: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
