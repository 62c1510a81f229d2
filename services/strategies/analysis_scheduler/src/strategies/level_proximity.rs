//! Level proximity strategy
//!
//! Buys when price trades just above strong support and sells just below
//! strong resistance, unless the day's range is already exhausted.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use state_context::{AnalyticalContext, Tier, TrendDirection};
use strategy_shared::Strategy;
use tracing::debug;
use types::{CandleWindows, Level, Signal, SignalType, Timeframe};

pub const NAME: &str = "level_proximity";

#[derive(Debug, Clone)]
pub struct LevelProximityConfig {
    /// Maximum distance to the level, percent of price
    pub proximity_pct: f64,
    /// How far to look for the opposite level used as target
    pub target_search_pct: f64,
    /// Stop placed this far beyond the level, percent of level price
    pub stop_buffer_pct: f64,
    pub exhaustion_threshold: f64,
    /// Skip entries against the hourly trend
    pub respect_trend: bool,
}

impl Default for LevelProximityConfig {
    fn default() -> Self {
        Self {
            proximity_pct: 0.5,
            target_search_pct: 10.0,
            stop_buffer_pct: 0.3,
            exhaustion_threshold: 0.75,
            respect_trend: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct LevelProximityStrategy {
    config: LevelProximityConfig,
}

impl LevelProximityStrategy {
    pub fn new(config: LevelProximityConfig) -> Self {
        Self { config }
    }

    fn hourly_trend(context: &AnalyticalContext) -> TrendDirection {
        context
            .market_condition_data()
            .and_then(|c| c.trend_by_timeframe.get(&Timeframe::H1).copied())
            .unwrap_or_default()
    }

    fn strength(&self, level: &Level, price: Decimal) -> f64 {
        let closeness = 1.0 - (level.distance_percent(price) / self.config.proximity_pct).min(1.0);
        (level.strength * (0.5 + 0.5 * closeness)).clamp(0.0, 1.0)
    }

    fn offset(&self, price: Decimal, pct: f64) -> Decimal {
        price * Decimal::from_f64(pct / 100.0).unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
impl Strategy for LevelProximityStrategy {
    fn name(&self) -> &str {
        NAME
    }

    async fn analyze(
        &self,
        symbol: &str,
        windows: &CandleWindows,
        context: &AnalyticalContext,
    ) -> Result<Option<Signal>> {
        // a partial context is still handed over; this strategy needs both tiers
        if !context.is_populated(Tier::Levels) || !context.is_populated(Tier::Volatility) {
            debug!(symbol, populated = context.populated_tiers(), "Levels or volatility not cached, no entry");
            return Ok(None);
        }

        let last = windows
            .values()
            .find_map(|bars| bars.last())
            .ok_or_else(|| anyhow!("no candles supplied for {}", symbol))?;
        let price = last.close;

        if context.is_exhausted(self.config.exhaustion_threshold) {
            debug!(symbol, "Daily range exhausted, no entry");
            return Ok(None);
        }

        let trend = Self::hourly_trend(context);
        let support = context
            .nearest_support(price, self.config.proximity_pct)
            .filter(|l| l.is_strong());
        let resistance = context
            .nearest_resistance(price, self.config.proximity_pct)
            .filter(|l| l.is_strong());

        // closer level wins when price sits between both
        let pick = match (support, resistance) {
            (Some(s), Some(r)) if r.distance_percent(price) < s.distance_percent(price) => {
                Some((SignalType::Sell, r))
            }
            (Some(s), _) => Some((SignalType::Buy, s)),
            (None, Some(r)) => Some((SignalType::Sell, r)),
            (None, None) => None,
        };
        let Some((signal_type, level)) = pick else {
            return Ok(None);
        };

        if self.config.respect_trend {
            let against = matches!(
                (signal_type, trend),
                (SignalType::Buy, TrendDirection::Down) | (SignalType::Sell, TrendDirection::Up)
            );
            if against {
                debug!(symbol, ?signal_type, ?trend, "Entry against hourly trend skipped");
                return Ok(None);
            }
        }

        let buffer = self.offset(level.price, self.config.stop_buffer_pct);
        let (stop_loss, target) = match signal_type {
            SignalType::Buy => (
                level.price - buffer,
                context
                    .nearest_resistance(price, self.config.target_search_pct)
                    .map(|l| l.price),
            ),
            SignalType::Sell => (
                level.price + buffer,
                context
                    .nearest_support(price, self.config.target_search_pct)
                    .map(|l| l.price),
            ),
        };

        let mut signal = Signal::new(
            symbol,
            NAME,
            signal_type,
            price,
            self.strength(level, price),
            last.close_time(),
        )
        .with_stop_loss(stop_loss)
        .with_reason(format!(
            "price {} within {:.2}% of {:?} {} (strength {:.2})",
            price,
            level.distance_percent(price),
            level.kind,
            level.price,
            level.strength
        ));
        if let Some(target) = target {
            signal = signal.with_take_profit(target);
        }
        Ok(Some(signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use state_context::testing::candle_series;
    use state_context::{MarketAssessment, MarketConditionData, PatternFlags, TierSnapshot, VolatilityData};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use types::LevelKind;

    fn windows_closing_at(close: Decimal) -> CandleWindows {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let mut bars = candle_series("BTCUSDT", Timeframe::M1, 20, now);
        if let Some(last) = bars.last_mut() {
            last.close = close;
            last.high = last.high.max(close);
            last.low = last.low.min(close);
        }
        let mut windows = CandleWindows::new();
        windows.insert(Timeframe::M1, bars);
        windows
    }

    fn context(levels: Vec<Level>, range_used: f64, trend: TrendDirection) -> AnalyticalContext {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let mut ctx = AnalyticalContext::new("BTCUSDT", now);
        ctx.levels = Some(Arc::new(TierSnapshot::new(levels, now)));
        ctx.volatility = Some(Arc::new(TierSnapshot::new(
            VolatilityData {
                calculated_range: dec!(4),
                structural_range: None,
                percent_of_price: 4.0,
                range_used,
                is_exhausted: range_used >= 0.75,
                current_price: dec!(100),
                recent_ranges: vec![dec!(4); 5],
            },
            now,
        )));
        let mut trends = BTreeMap::new();
        trends.insert(Timeframe::H1, trend);
        ctx.market_condition = Some(Arc::new(TierSnapshot::new(
            MarketConditionData::from_parts(
                MarketAssessment {
                    trend_by_timeframe: trends,
                    ..MarketAssessment::default()
                },
                PatternFlags::default(),
                false,
            ),
            now,
        )));
        ctx
    }

    fn level(price: Decimal, kind: LevelKind, strength: f64) -> Level {
        Level::new(price, kind, strength, 4, None).unwrap()
    }

    #[tokio::test]
    async fn test_buy_near_strong_support() {
        let strategy = LevelProximityStrategy::default();
        let ctx = context(
            vec![
                level(dec!(99.8), LevelKind::Support, 0.9),
                level(dec!(104), LevelKind::Resistance, 0.8),
            ],
            0.3,
            TrendDirection::Sideways,
        );

        let signal = strategy
            .analyze("BTCUSDT", &windows_closing_at(dec!(100)), &ctx)
            .await
            .unwrap()
            .expect("signal");
        assert_eq!(signal.signal_type, SignalType::Buy);
        assert_eq!(signal.strategy, NAME);
        assert!(signal.stop_loss.unwrap() < dec!(99.8));
        assert_eq!(signal.take_profit, Some(dec!(104)));
        assert!(signal.strength > 0.45 && signal.strength <= 0.9);
    }

    #[tokio::test]
    async fn test_sell_near_strong_resistance() {
        let strategy = LevelProximityStrategy::default();
        let ctx = context(
            vec![level(dec!(100.3), LevelKind::Resistance, 0.75)],
            0.2,
            TrendDirection::Down,
        );
        let signal = strategy
            .analyze("BTCUSDT", &windows_closing_at(dec!(100)), &ctx)
            .await
            .unwrap()
            .expect("signal");
        assert_eq!(signal.signal_type, SignalType::Sell);
        assert!(signal.stop_loss.unwrap() > dec!(100.3));
        assert_eq!(signal.take_profit, None);
    }

    #[tokio::test]
    async fn test_no_signal_when_exhausted_weak_or_against_trend() {
        let strategy = LevelProximityStrategy::default();
        let windows = windows_closing_at(dec!(100));

        let exhausted = context(vec![level(dec!(99.8), LevelKind::Support, 0.9)], 0.8, TrendDirection::Up);
        assert!(strategy.analyze("BTCUSDT", &windows, &exhausted).await.unwrap().is_none());

        let weak = context(vec![level(dec!(99.8), LevelKind::Support, 0.4)], 0.1, TrendDirection::Up);
        assert!(strategy.analyze("BTCUSDT", &windows, &weak).await.unwrap().is_none());

        let against = context(vec![level(dec!(99.8), LevelKind::Support, 0.9)], 0.1, TrendDirection::Down);
        assert!(strategy.analyze("BTCUSDT", &windows, &against).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_signal_without_levels_or_volatility() {
        let strategy = LevelProximityStrategy::default();
        let windows = windows_closing_at(dec!(100));

        let mut no_levels = context(vec![level(dec!(99.8), LevelKind::Support, 0.9)], 0.1, TrendDirection::Up);
        no_levels.levels = None;
        assert!(strategy.analyze("BTCUSDT", &windows, &no_levels).await.unwrap().is_none());

        let mut no_volatility = context(vec![level(dec!(99.8), LevelKind::Support, 0.9)], 0.1, TrendDirection::Up);
        no_volatility.volatility = None;
        assert!(strategy.analyze("BTCUSDT", &windows, &no_volatility).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_windows_is_an_error() {
        let strategy = LevelProximityStrategy::default();
        let ctx = context(Vec::new(), 0.1, TrendDirection::Up);
        assert!(strategy
            .analyze("BTCUSDT", &CandleWindows::new(), &ctx)
            .await
            .is_err());
    }
}
