//! Collaborator traits
//!
//! The coordinator reads candles through [`Repository`] and fills tiers through
//! [`AnalyzerSet`]. Both are plugged in at construction so production wiring
//! and tests can supply their own implementations.

use crate::context::{MarketAssessment, PatternFlags, VolatilityData};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use types::{Candle, CandleWindows, Level, Timeframe};

/// Read-only time-series candle source
#[async_trait]
pub trait Repository: Send + Sync {
    /// Bars with `open_time >= start`, oldest first, at most `limit` of them.
    ///
    /// May return fewer bars than requested; no gap filling is performed.
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}

/// Tier analyzers. Each call is independent and side-effect free.
#[async_trait]
pub trait AnalyzerSet: Send + Sync {
    /// Support and resistance levels from daily bars
    async fn compute_levels(&self, symbol: &str, daily: &[Candle]) -> Result<Vec<Level>>;

    /// Daily range statistics. `levels` is the last committed level tier.
    async fn compute_volatility(
        &self,
        symbol: &str,
        daily: &[Candle],
        levels: &[Level],
        current_price: Decimal,
        exhaustion_threshold: f64,
    ) -> Result<VolatilityData>;

    async fn detect_patterns(&self, symbol: &str, windows: &CandleWindows) -> Result<PatternFlags>;

    /// Whether price recently broke through one of `levels`
    async fn detect_breakout(
        &self,
        symbol: &str,
        windows: &CandleWindows,
        levels: &[Level],
    ) -> Result<bool>;

    async fn assess_market_condition(
        &self,
        symbol: &str,
        windows: &CandleWindows,
        levels: &[Level],
        volatility: Option<&VolatilityData>,
    ) -> Result<MarketAssessment>;
}
