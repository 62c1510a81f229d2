//! Default analyzer set
//!
//! Straightforward structure heuristics used by the service binary:
//! swing-pivot levels from daily bars, average-daily-range volatility,
//! compression / consolidation / V-formation detection, recent level
//! breakouts and half-window trend direction.

use crate::context::{
    MarketAssessment, MarketCondition, PatternFlags, TrendDirection, VolatilityData,
    VolatilityLevel,
};
use crate::traits::AnalyzerSet;
use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use types::{Candle, CandleWindows, Level, LevelKind};

/// Tunables for [`DefaultAnalyzers`]
#[derive(Debug, Clone)]
pub struct AnalyzerParams {
    /// Bars on each side a swing pivot must exceed
    pub pivot_window: usize,
    /// Pivots closer than this percent are merged into one level
    pub cluster_tolerance_pct: f64,
    /// Trailing bars averaged for compression detection
    pub compression_bars: usize,
    /// Recent-to-baseline range ratio below which price is compressing
    pub compression_ratio: f64,
    /// Band (percent of mean) a consolidation must stay within
    pub consolidation_band_pct: f64,
    pub min_consolidation_bars: u32,
    pub v_formation_bars: usize,
    pub v_formation_move_pct: f64,
    /// Bars scanned for a level crossing
    pub breakout_lookback: usize,
    /// Half-window mean change needed to call a trend
    pub trend_threshold_pct: f64,
    /// Daily range percent boundaries between low / normal / high volatility
    pub low_volatility_pct: f64,
    pub high_volatility_pct: f64,
}

impl Default for AnalyzerParams {
    fn default() -> Self {
        Self {
            pivot_window: 2,
            cluster_tolerance_pct: 0.5,
            compression_bars: 5,
            compression_ratio: 0.6,
            consolidation_band_pct: 1.5,
            min_consolidation_bars: 6,
            v_formation_bars: 10,
            v_formation_move_pct: 1.0,
            breakout_lookback: 4,
            trend_threshold_pct: 0.5,
            low_volatility_pct: 2.0,
            high_volatility_pct: 5.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DefaultAnalyzers {
    params: AnalyzerParams,
}

impl DefaultAnalyzers {
    pub fn new(params: AnalyzerParams) -> Self {
        Self { params }
    }

    fn swing_pivots(&self, daily: &[Candle]) -> Vec<Decimal> {
        let w = self.params.pivot_window;
        let mut pivots = Vec::new();
        if daily.len() < 2 * w + 1 {
            return pivots;
        }
        for i in w..daily.len() - w {
            let neighbours = daily[i - w..i].iter().chain(daily[i + 1..=i + w].iter());
            let bar = &daily[i];
            if neighbours.clone().all(|n| bar.high > n.high) {
                pivots.push(bar.high);
            }
            if neighbours.into_iter().all(|n| bar.low < n.low) {
                pivots.push(bar.low);
            }
        }
        pivots
    }

    fn cluster(&self, mut pivots: Vec<Decimal>) -> Vec<Decimal> {
        pivots.sort();
        let tolerance = decimal(self.params.cluster_tolerance_pct / 100.0);
        let mut clusters: Vec<Vec<Decimal>> = Vec::new();
        for price in pivots {
            match clusters.last_mut() {
                Some(group) if (price - group[0]) <= group[0] * tolerance => group.push(price),
                _ => clusters.push(vec![price]),
            }
        }
        clusters
            .into_iter()
            .map(|group| {
                let sum: Decimal = group.iter().copied().sum();
                sum / Decimal::from(group.len() as u64)
            })
            .collect()
    }

    /// Fastest window holding at least `min_bars` bars
    fn primary_window<'a>(&self, windows: &'a CandleWindows, min_bars: usize) -> Option<&'a [Candle]> {
        windows
            .values()
            .find(|bars| bars.len() >= min_bars)
            .map(Vec::as_slice)
    }

    fn trend(&self, bars: &[Candle]) -> TrendDirection {
        if bars.len() < 4 {
            return TrendDirection::Unknown;
        }
        let half = bars.len() / 2;
        let first = mean(bars[..half].iter().map(|b| b.close));
        let second = mean(bars[half..].iter().map(|b| b.close));
        let change = pct_change(first, second);
        if change > self.params.trend_threshold_pct {
            TrendDirection::Up
        } else if change < -self.params.trend_threshold_pct {
            TrendDirection::Down
        } else {
            TrendDirection::Sideways
        }
    }
}

#[async_trait]
impl AnalyzerSet for DefaultAnalyzers {
    async fn compute_levels(&self, symbol: &str, daily: &[Candle]) -> Result<Vec<Level>> {
        let w = self.params.pivot_window;
        if daily.len() < 2 * w + 1 {
            bail!(
                "{} needs at least {} daily bars for levels, got {}",
                symbol,
                2 * w + 1,
                daily.len()
            );
        }
        let last_close = daily[daily.len() - 1].close;
        let tolerance = decimal(self.params.cluster_tolerance_pct / 100.0);

        let candidates: Vec<(Decimal, u32, Option<chrono::DateTime<chrono::Utc>>)> = self
            .cluster(self.swing_pivots(daily))
            .into_iter()
            .map(|price| {
                let band = price * tolerance;
                let touching = daily
                    .iter()
                    .filter(|bar| bar.low - band <= price && price <= bar.high + band);
                let touches = touching.clone().count() as u32;
                let last_touch = touching.map(|bar| bar.open_time).max();
                (price, touches, last_touch)
            })
            .collect();

        let max_touches = candidates.iter().map(|c| c.1).max().unwrap_or(1).max(1);
        let mut levels = Vec::with_capacity(candidates.len());
        for (price, touches, last_touch) in candidates {
            let kind = if price >= last_close {
                LevelKind::Resistance
            } else {
                LevelKind::Support
            };
            let strength = (touches as f64 / max_touches as f64).clamp(0.0, 1.0);
            levels.push(Level::new(price, kind, strength, touches, last_touch)?);
        }
        Ok(levels)
    }

    async fn compute_volatility(
        &self,
        symbol: &str,
        daily: &[Candle],
        levels: &[Level],
        current_price: Decimal,
        exhaustion_threshold: f64,
    ) -> Result<VolatilityData> {
        // the last bar is the forming UTC day; the rest are completed days
        let Some((today, completed)) = daily.split_last() else {
            bail!("{} has no daily bars for volatility", symbol);
        };
        if completed.is_empty() {
            bail!("{} has no completed daily bars for volatility", symbol);
        }
        if current_price <= Decimal::ZERO {
            bail!("{} has non-positive price {}", symbol, current_price);
        }

        let recent_ranges: Vec<Decimal> = completed.iter().map(Candle::range).collect();
        let average = mean(recent_ranges.iter().copied());
        if average <= Decimal::ZERO {
            bail!("{} average daily range is zero", symbol);
        }

        let range_used = (today.range() / average).to_f64().unwrap_or(0.0).clamp(0.0, 1.0);
        let percent_of_price = (average / current_price * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0);

        let support = levels
            .iter()
            .filter(|l| l.kind == LevelKind::Support && l.price < current_price)
            .map(|l| l.price)
            .max();
        let resistance = levels
            .iter()
            .filter(|l| l.kind == LevelKind::Resistance && l.price > current_price)
            .map(|l| l.price)
            .min();
        let structural_range = support.zip(resistance).map(|(s, r)| r - s);

        Ok(VolatilityData {
            calculated_range: average,
            structural_range,
            percent_of_price,
            range_used,
            is_exhausted: range_used >= exhaustion_threshold,
            current_price,
            recent_ranges,
        })
    }

    async fn detect_patterns(&self, _symbol: &str, windows: &CandleWindows) -> Result<PatternFlags> {
        let p = &self.params;
        let Some(bars) = self.primary_window(windows, p.compression_bars * 2) else {
            return Ok(PatternFlags::default());
        };

        let (baseline, recent) = bars.split_at(bars.len() - p.compression_bars);
        let recent_range = mean(recent.iter().map(Candle::range));
        let baseline_range = mean(baseline.iter().map(Candle::range));
        let has_compression = baseline_range > Decimal::ZERO
            && (recent_range / baseline_range).to_f64().unwrap_or(1.0) < p.compression_ratio;

        // trailing bars whose extremes stay inside the band
        let mut consolidation_bars = 0u32;
        let mut high = Decimal::MIN;
        let mut low = Decimal::MAX;
        for bar in bars.iter().rev() {
            high = high.max(bar.high);
            low = low.min(bar.low);
            if pct_change(low, high) > p.consolidation_band_pct {
                break;
            }
            consolidation_bars += 1;
        }

        // first, trough or peak, last: anything shorter has no shape
        let has_v_formation = p.v_formation_bars >= 3 && bars.len() >= p.v_formation_bars && {
            let tail = &bars[bars.len() - p.v_formation_bars..];
            let first = tail[0].close;
            let last = tail[tail.len() - 1].close;
            let inner = &tail[1..tail.len() - 1];
            let trough = inner.iter().map(|b| b.low).min().unwrap_or(first);
            let peak = inner.iter().map(|b| b.high).max().unwrap_or(first);
            let v = pct_change(first, trough) < -p.v_formation_move_pct
                && pct_change(trough, last) > p.v_formation_move_pct;
            let inverted = pct_change(first, peak) > p.v_formation_move_pct
                && pct_change(peak, last) < -p.v_formation_move_pct;
            v || inverted
        };

        Ok(PatternFlags {
            has_compression,
            consolidation_detected: consolidation_bars >= p.min_consolidation_bars,
            consolidation_bars,
            has_v_formation,
        })
    }

    async fn detect_breakout(
        &self,
        _symbol: &str,
        windows: &CandleWindows,
        levels: &[Level],
    ) -> Result<bool> {
        let lookback = self.params.breakout_lookback.max(2);
        let Some(bars) = self.primary_window(windows, lookback) else {
            return Ok(false);
        };
        let tail = &bars[bars.len() - lookback..];
        Ok(tail.windows(2).any(|pair| {
            let (before, after) = (pair[0].close, pair[1].close);
            levels.iter().any(|level| {
                (before < level.price && after > level.price)
                    || (before > level.price && after < level.price)
            })
        }))
    }

    async fn assess_market_condition(
        &self,
        _symbol: &str,
        windows: &CandleWindows,
        _levels: &[Level],
        volatility: Option<&VolatilityData>,
    ) -> Result<MarketAssessment> {
        let trend_by_timeframe: BTreeMap<_, _> = windows
            .iter()
            .map(|(timeframe, bars)| (*timeframe, self.trend(bars)))
            .collect();

        let volatility_level = match volatility {
            None => VolatilityLevel::Unknown,
            Some(v) if v.percent_of_price < self.params.low_volatility_pct => VolatilityLevel::Low,
            Some(v) if v.percent_of_price < self.params.high_volatility_pct => {
                VolatilityLevel::Normal
            }
            Some(_) => VolatilityLevel::High,
        };

        let known: Vec<TrendDirection> = trend_by_timeframe
            .values()
            .copied()
            .filter(|t| *t != TrendDirection::Unknown)
            .collect();
        let count = |dir: TrendDirection| known.iter().filter(|t| **t == dir).count();
        let dominant = count(TrendDirection::Up).max(count(TrendDirection::Down));

        let condition = if known.is_empty() {
            MarketCondition::Unknown
        } else if volatility_level == VolatilityLevel::High {
            MarketCondition::Volatile
        } else if dominant * 3 >= known.len() * 2 {
            MarketCondition::Trending
        } else if count(TrendDirection::Sideways) * 3 >= known.len() * 2 {
            MarketCondition::Consolidation
        } else {
            MarketCondition::Neutral
        };

        Ok(MarketAssessment {
            condition,
            trend_by_timeframe,
            volatility_level,
        })
    }
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

fn mean(values: impl Iterator<Item = Decimal>) -> Decimal {
    let (sum, count) = values.fold((Decimal::ZERO, 0u64), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        Decimal::ZERO
    } else {
        sum / Decimal::from(count)
    }
}

/// Percent change from `from` to `to`
fn pct_change(from: Decimal, to: Decimal) -> f64 {
    if from <= Decimal::ZERO {
        return 0.0;
    }
    ((to - from) / from * Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(0.0)
}
