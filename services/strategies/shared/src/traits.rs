//! Strategy traits and interfaces

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use state_context::AnalyticalContext;
use types::{CandleWindows, Signal};

/// Core strategy trait that all trading strategies must implement.
///
/// `analyze` may be called concurrently for different symbols and must treat
/// the context as read-only.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Strategy name for identification
    fn name(&self) -> &str;

    /// Inspect fresh candle windows and the cached context for `symbol`
    async fn analyze(
        &self,
        symbol: &str,
        windows: &CandleWindows,
        context: &AnalyticalContext,
    ) -> Result<Option<Signal>>;
}

/// Downstream consumer of generated signals
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn submit(&self, signal: Signal) -> Result<()>;
}

/// Per-strategy metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyMetrics {
    pub analyses: u64,
    pub successes: u64,
    pub errors: u64,
    pub signals_generated: u64,
    pub avg_analysis_ms: f64,
    pub last_error: Option<String>,
}

impl StrategyMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.analyses == 0 {
            1.0
        } else {
            self.successes as f64 / self.analyses as f64
        }
    }
}
