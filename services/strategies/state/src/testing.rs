//! Testing utilities for the context cache
//!
//! Deterministic candle fixtures, a seeded repository and an analyzer set that
//! counts its calls and can be told to fail, stall or panic.

use crate::context::{
    MarketAssessment, MarketCondition, PatternFlags, TrendDirection, VolatilityData,
    VolatilityLevel,
};
use crate::repository::InMemoryRepository;
use crate::traits::AnalyzerSet;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use types::{Candle, CandleWindows, Level, LevelKind, Timeframe};

/// Close offsets repeated by [`candle_series`]; produces regular swing pivots
const ZIGZAG: [i64; 10] = [0, 2, 4, 3, 1, -1, -3, -2, 0, 1];

/// `count` consecutive bars ending at `end`, oldest first.
///
/// The last bar opens one bar length before `end`.
pub fn candle_series(symbol: &str, timeframe: Timeframe, count: usize, end: DateTime<Utc>) -> Vec<Candle> {
    let base = Decimal::from(100);
    let mut previous_close = base;
    (0..count)
        .map(|i| {
            let open_time = end - timeframe.duration() * (count - i) as i32;
            let close = base + Decimal::from(ZIGZAG[i % ZIGZAG.len()]);
            let open = previous_close;
            previous_close = close;
            let high = open.max(close) + Decimal::ONE;
            let low = open.min(close) - Decimal::ONE;
            Candle {
                symbol: symbol.to_uppercase(),
                timeframe,
                open_time,
                open,
                high,
                low,
                close,
                volume: Decimal::from(1_000),
            }
        })
        .collect()
}

/// Repository seeded with enough history on every timeframe for the default
/// cache windows and scheduler requirements.
pub fn seeded_repository(symbols: &[&str], now: DateTime<Utc>) -> InMemoryRepository {
    let repository = InMemoryRepository::new();
    for symbol in symbols {
        for (timeframe, count) in [
            (Timeframe::M1, 120),
            (Timeframe::M5, 120),
            (Timeframe::M30, 60),
            (Timeframe::H1, 48),
            (Timeframe::H4, 30),
            (Timeframe::D1, 200),
        ] {
            repository.insert(candle_series(symbol, timeframe, count, now));
        }
    }
    repository
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyzerKind {
    Levels,
    Volatility,
    Patterns,
    Breakout,
    MarketCondition,
}

impl AnalyzerKind {
    pub const ALL: [AnalyzerKind; 5] = [
        AnalyzerKind::Levels,
        AnalyzerKind::Volatility,
        AnalyzerKind::Patterns,
        AnalyzerKind::Breakout,
        AnalyzerKind::MarketCondition,
    ];

    fn index(&self) -> usize {
        match self {
            AnalyzerKind::Levels => 0,
            AnalyzerKind::Volatility => 1,
            AnalyzerKind::Patterns => 2,
            AnalyzerKind::Breakout => 3,
            AnalyzerKind::MarketCondition => 4,
        }
    }
}

/// Analyzer set with call counters and injectable faults
#[derive(Debug, Default)]
pub struct CountingAnalyzers {
    calls: [AtomicU64; 5],
    delay: Duration,
    failing: Mutex<HashSet<AnalyzerKind>>,
    panicking: Mutex<HashSet<AnalyzerKind>>,
}

impl CountingAnalyzers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps `delay` before answering
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self, kind: AnalyzerKind) -> u64 {
        self.calls[kind.index()].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u64 {
        AnalyzerKind::ALL.iter().map(|kind| self.calls(*kind)).sum()
    }

    pub fn fail(&self, kind: AnalyzerKind) {
        self.failing.lock().insert(kind);
    }

    pub fn recover(&self, kind: AnalyzerKind) {
        self.failing.lock().remove(&kind);
        self.panicking.lock().remove(&kind);
    }

    pub fn panic_on(&self, kind: AnalyzerKind) {
        self.panicking.lock().insert(kind);
    }

    async fn enter(&self, kind: AnalyzerKind) -> Result<()> {
        self.calls[kind.index()].fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panicking.lock().contains(&kind) {
            panic!("{:?} analyzer panicked", kind);
        }
        if self.failing.lock().contains(&kind) {
            bail!("{:?} analyzer failed", kind);
        }
        Ok(())
    }
}

#[async_trait]
impl AnalyzerSet for CountingAnalyzers {
    async fn compute_levels(&self, symbol: &str, daily: &[Candle]) -> Result<Vec<Level>> {
        self.enter(AnalyzerKind::Levels).await?;
        let Some(last) = daily.last() else {
            bail!("{} has no daily bars", symbol);
        };
        let support = last.close * Decimal::new(97, 2);
        let resistance = last.close * Decimal::new(103, 2);
        Ok(vec![
            Level::new(support, LevelKind::Support, 0.8, 3, Some(last.open_time))?,
            Level::new(resistance, LevelKind::Resistance, 0.8, 3, Some(last.open_time))?,
        ])
    }

    async fn compute_volatility(
        &self,
        _symbol: &str,
        daily: &[Candle],
        levels: &[Level],
        current_price: Decimal,
        exhaustion_threshold: f64,
    ) -> Result<VolatilityData> {
        self.enter(AnalyzerKind::Volatility).await?;
        let recent_ranges: Vec<Decimal> = daily.iter().map(Candle::range).collect();
        let calculated_range = if recent_ranges.is_empty() {
            Decimal::ZERO
        } else {
            recent_ranges.iter().copied().sum::<Decimal>() / Decimal::from(recent_ranges.len() as u64)
        };
        let structural_range = match (levels.first(), levels.last()) {
            (Some(low), Some(high)) if levels.len() > 1 => Some(high.price - low.price),
            _ => None,
        };
        let range_used = 0.5;
        Ok(VolatilityData {
            calculated_range,
            structural_range,
            percent_of_price: 2.5,
            range_used,
            is_exhausted: range_used >= exhaustion_threshold,
            current_price,
            recent_ranges,
        })
    }

    async fn detect_patterns(&self, _symbol: &str, _windows: &CandleWindows) -> Result<PatternFlags> {
        self.enter(AnalyzerKind::Patterns).await?;
        Ok(PatternFlags::default())
    }

    async fn detect_breakout(
        &self,
        _symbol: &str,
        _windows: &CandleWindows,
        _levels: &[Level],
    ) -> Result<bool> {
        self.enter(AnalyzerKind::Breakout).await?;
        Ok(false)
    }

    async fn assess_market_condition(
        &self,
        _symbol: &str,
        windows: &CandleWindows,
        _levels: &[Level],
        _volatility: Option<&VolatilityData>,
    ) -> Result<MarketAssessment> {
        self.enter(AnalyzerKind::MarketCondition).await?;
        Ok(MarketAssessment {
            condition: MarketCondition::Neutral,
            trend_by_timeframe: windows
                .keys()
                .map(|timeframe| (*timeframe, TrendDirection::Sideways))
                .collect(),
            volatility_level: VolatilityLevel::Normal,
        })
    }
}
