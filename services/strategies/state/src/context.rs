//! Analytical Context - per-symbol cached market structure
//!
//! A context holds four independently aged tiers. Each populated tier is a
//! [`TierSnapshot`] pairing the payload with the instant it was computed, so a
//! reader can never observe data from one refresh pass next to the timestamp
//! of another. Contexts are published as immutable `Arc<AnalyticalContext>`
//! values; the coordinator commits a tier by cloning the current context,
//! swapping one snapshot and publishing the new `Arc`.

use crate::freshness::FreshnessPolicy;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use types::{Candle, CandleWindows, Level, LevelKind, Timeframe};

/// Independently aged category of cached data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Candles,
    Levels,
    Volatility,
    MarketCondition,
}

impl Tier {
    /// All tiers in refresh dependency order
    pub const ALL: [Tier; 4] = [
        Tier::Candles,
        Tier::Levels,
        Tier::Volatility,
        Tier::MarketCondition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Candles => "candles",
            Tier::Levels => "levels",
            Tier::Volatility => "volatility",
            Tier::MarketCondition => "market_condition",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Tier::Candles => 0,
            Tier::Levels => 1,
            Tier::Volatility => 2,
            Tier::MarketCondition => 3,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier payload together with the instant it was computed
#[derive(Debug, Clone, PartialEq)]
pub struct TierSnapshot<T> {
    pub data: T,
    pub refreshed_at: DateTime<Utc>,
}

impl<T> TierSnapshot<T> {
    pub fn new(data: T, refreshed_at: DateTime<Utc>) -> Self {
        Self { data, refreshed_at }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.refreshed_at
    }
}

/// Daily range statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityData {
    /// Average range of recent completed daily bars
    pub calculated_range: Decimal,
    /// Distance between the nearest support below and resistance above the
    /// price, when both exist
    pub structural_range: Option<Decimal>,
    /// `calculated_range` as a percent of the current price
    pub percent_of_price: f64,
    /// Fraction of the average range already covered today, in [0, 1]
    pub range_used: f64,
    pub is_exhausted: bool,
    pub current_price: Decimal,
    /// Ranges the average was taken over, oldest first
    pub recent_ranges: Vec<Decimal>,
}

impl VolatilityData {
    pub fn remaining_percent(&self) -> f64 {
        ((1.0 - self.range_used) * 100.0).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketCondition {
    Consolidation,
    Trending,
    Volatile,
    Neutral,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityLevel {
    Low,
    Normal,
    High,
    #[default]
    Unknown,
}

/// Output of the pattern analyzer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternFlags {
    pub has_compression: bool,
    pub consolidation_detected: bool,
    pub consolidation_bars: u32,
    pub has_v_formation: bool,
}

/// Output of the market-condition analyzer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketAssessment {
    pub condition: MarketCondition,
    pub trend_by_timeframe: BTreeMap<Timeframe, TrendDirection>,
    pub volatility_level: VolatilityLevel,
}

/// Derived market-condition tier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketConditionData {
    pub condition: MarketCondition,
    pub trend_by_timeframe: BTreeMap<Timeframe, TrendDirection>,
    pub volatility_level: VolatilityLevel,
    pub consolidation_detected: bool,
    pub consolidation_bars: u32,
    pub has_compression: bool,
    pub has_recent_breakout: bool,
    pub has_v_formation: bool,
}

impl MarketConditionData {
    pub fn from_parts(assessment: MarketAssessment, patterns: PatternFlags, breakout: bool) -> Self {
        Self {
            condition: assessment.condition,
            trend_by_timeframe: assessment.trend_by_timeframe,
            volatility_level: assessment.volatility_level,
            consolidation_detected: patterns.consolidation_detected,
            consolidation_bars: patterns.consolidation_bars,
            has_compression: patterns.has_compression,
            has_recent_breakout: breakout,
            has_v_formation: patterns.has_v_formation,
        }
    }
}

/// Cached analytical snapshot for one symbol
#[derive(Debug, Clone)]
pub struct AnalyticalContext {
    pub symbol: String,
    pub created_at: DateTime<Utc>,
    pub candles: Option<Arc<TierSnapshot<CandleWindows>>>,
    /// Levels sorted by ascending price
    pub levels: Option<Arc<TierSnapshot<Vec<Level>>>>,
    pub volatility: Option<Arc<TierSnapshot<VolatilityData>>>,
    pub market_condition: Option<Arc<TierSnapshot<MarketConditionData>>>,
    pub update_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
}

impl AnalyticalContext {
    pub fn new(symbol: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            created_at,
            candles: None,
            levels: None,
            volatility: None,
            market_condition: None,
            update_count: 0,
            error_count: 0,
            last_error: None,
        }
    }

    pub fn refreshed_at(&self, tier: Tier) -> Option<DateTime<Utc>> {
        match tier {
            Tier::Candles => self.candles.as_ref().map(|s| s.refreshed_at),
            Tier::Levels => self.levels.as_ref().map(|s| s.refreshed_at),
            Tier::Volatility => self.volatility.as_ref().map(|s| s.refreshed_at),
            Tier::MarketCondition => self.market_condition.as_ref().map(|s| s.refreshed_at),
        }
    }

    pub fn is_populated(&self, tier: Tier) -> bool {
        self.refreshed_at(tier).is_some()
    }

    /// Every tier has been populated at least once
    pub fn is_fully_initialized(&self) -> bool {
        Tier::ALL.iter().all(|tier| self.is_populated(*tier))
    }

    pub fn populated_tiers(&self) -> usize {
        Tier::ALL.iter().filter(|tier| self.is_populated(**tier)).count()
    }

    pub fn levels(&self) -> &[Level] {
        self.levels.as_ref().map(|s| s.data.as_slice()).unwrap_or(&[])
    }

    pub fn candles(&self, timeframe: Timeframe) -> &[Candle] {
        self.candles
            .as_ref()
            .and_then(|s| s.data.get(&timeframe))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn volatility_data(&self) -> Option<&VolatilityData> {
        self.volatility.as_ref().map(|s| &s.data)
    }

    pub fn market_condition_data(&self) -> Option<&MarketConditionData> {
        self.market_condition.as_ref().map(|s| &s.data)
    }

    /// Last close of the fastest cached candle window.
    pub fn current_price(&self) -> Option<Decimal> {
        self.candles
            .as_ref()
            .and_then(|s| s.data.values().find_map(|bars| bars.last()))
            .map(|bar| bar.close)
            .or_else(|| self.volatility_data().map(|v| v.current_price))
    }

    /// Closest support below `price` within `max_distance_pct`
    pub fn nearest_support(&self, price: Decimal, max_distance_pct: f64) -> Option<&Level> {
        self.levels()
            .iter()
            .filter(|l| l.kind == LevelKind::Support && l.price < price)
            .filter(|l| l.distance_percent(price) <= max_distance_pct)
            .max_by(|a, b| a.price.cmp(&b.price))
    }

    /// Closest resistance above `price` within `max_distance_pct`
    pub fn nearest_resistance(&self, price: Decimal, max_distance_pct: f64) -> Option<&Level> {
        self.levels()
            .iter()
            .filter(|l| l.kind == LevelKind::Resistance && l.price > price)
            .filter(|l| l.distance_percent(price) <= max_distance_pct)
            .min_by(|a, b| a.price.cmp(&b.price))
    }

    pub fn strong_levels(&self) -> Vec<&Level> {
        self.levels().iter().filter(|l| l.is_strong()).collect()
    }

    /// Any level lies within `tolerance_pct` of `price`
    pub fn is_near_level(&self, price: Decimal, tolerance_pct: f64) -> bool {
        self.levels()
            .iter()
            .any(|l| l.distance_percent(price) <= tolerance_pct)
    }

    /// Daily range used has reached `threshold`. False while volatility is unknown.
    pub fn is_exhausted(&self, threshold: f64) -> bool {
        self.volatility_data()
            .map(|v| v.range_used >= threshold)
            .unwrap_or(false)
    }

    pub fn remaining_range_percent(&self) -> Option<f64> {
        self.volatility_data().map(VolatilityData::remaining_percent)
    }

    /// Per-tier validity and age
    pub fn cache_status(&self, policy: &FreshnessPolicy, now: DateTime<Utc>) -> Vec<TierStatus> {
        Tier::ALL
            .iter()
            .map(|tier| {
                let refreshed_at = self.refreshed_at(*tier);
                TierStatus {
                    tier: *tier,
                    populated: refreshed_at.is_some(),
                    valid: policy.is_valid(*tier, refreshed_at, now),
                    age_secs: refreshed_at.map(|at| (now - at).num_seconds()),
                    due_at: refreshed_at.map(|at| policy.due_at(*tier, at)),
                }
            })
            .collect()
    }

    pub fn summary(&self, policy: &FreshnessPolicy, now: DateTime<Utc>) -> ContextSummary {
        ContextSummary {
            symbol: self.symbol.clone(),
            fully_initialized: self.is_fully_initialized(),
            levels: self.levels().len(),
            strong_levels: self.strong_levels().len(),
            current_price: self.current_price(),
            range_used_pct: self.volatility_data().map(|v| v.range_used * 100.0),
            is_exhausted: self.volatility_data().map(|v| v.is_exhausted).unwrap_or(false),
            condition: self
                .market_condition_data()
                .map(|c| c.condition)
                .unwrap_or_default(),
            update_count: self.update_count,
            error_count: self.error_count,
            last_error: self.last_error.clone(),
            tiers: self.cache_status(policy, now),
        }
    }
}

/// Validity report for a single tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStatus {
    pub tier: Tier,
    pub populated: bool,
    pub valid: bool,
    pub age_secs: Option<i64>,
    pub due_at: Option<DateTime<Utc>>,
}

/// Operator-facing digest of a context
#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub symbol: String,
    pub fully_initialized: bool,
    pub levels: usize,
    pub strong_levels: usize,
    pub current_price: Option<Decimal>,
    pub range_used_pct: Option<f64>,
    pub is_exhausted: bool,
    pub condition: MarketCondition,
    pub update_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub tiers: Vec<TierStatus>,
}

/// Percent distance between two prices, relative to `reference`
pub fn percent_between(a: Decimal, b: Decimal, reference: Decimal) -> f64 {
    if reference <= Decimal::ZERO {
        return 0.0;
    }
    ((a - b).abs() / reference * Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(0.0)
}
