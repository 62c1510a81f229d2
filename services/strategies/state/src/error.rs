//! Context cache errors

use crate::context::Tier;
use thiserror::Error;
use types::Timeframe;

/// Errors raised by the cache coordinator.
///
/// Cloneable so a single in-flight refresh outcome can be handed to every
/// caller that coalesced onto it.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("{tier} refresh failed for {symbol}: {reason}")]
    TierRefreshFailed {
        symbol: String,
        tier: Tier,
        reason: String,
    },

    #[error("{tier} refresh for {symbol} timed out after {timeout_ms}ms")]
    Timeout {
        symbol: String,
        tier: Tier,
        timeout_ms: u64,
    },

    #[error("{tier} refresh for {symbol} requires the {missing} tier")]
    MissingDependency {
        symbol: String,
        tier: Tier,
        missing: Tier,
    },

    #[error("Repository returned no {timeframe} candles for {symbol}")]
    NoData { symbol: String, timeframe: Timeframe },

    #[error("Context for {symbol} has no usable tier: {reason}")]
    Unavailable { symbol: String, reason: String },
}

impl ContextError {
    pub fn tier(&self) -> Option<Tier> {
        match self {
            ContextError::TierRefreshFailed { tier, .. }
            | ContextError::Timeout { tier, .. }
            | ContextError::MissingDependency { tier, .. } => Some(*tier),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;
