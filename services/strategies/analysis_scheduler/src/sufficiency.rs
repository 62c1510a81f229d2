//! Candle sufficiency validation
//!
//! Every timeframe carries a minimum bar count. A shortfall on a critical
//! timeframe skips the symbol for the cycle; on an optional timeframe it only
//! degrades the analysis. Consecutive critical failures are tracked per
//! symbol so persistent data gaps surface separately from transient errors.

use crate::error::SchedulerError;
use config::TimeframeRequirement;
use dashmap::DashMap;
use serde::Serialize;
use types::{CandleWindows, Timeframe};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortfall {
    pub timeframe: Timeframe,
    pub available: usize,
    pub required: usize,
    pub critical: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SufficiencyReport {
    pub shortfalls: Vec<Shortfall>,
}

impl SufficiencyReport {
    /// No critical timeframe is short
    pub fn is_sufficient(&self) -> bool {
        !self.shortfalls.iter().any(|s| s.critical)
    }

    /// Optional timeframes are short, so analysis runs with reduced quality
    pub fn is_degraded(&self) -> bool {
        self.shortfalls.iter().any(|s| !s.critical)
    }

    /// First critical shortfall as an error
    pub fn to_error(&self, symbol: &str) -> Option<SchedulerError> {
        self.shortfalls
            .iter()
            .find(|s| s.critical)
            .map(|s| SchedulerError::InsufficientData {
                symbol: symbol.to_string(),
                timeframe: s.timeframe,
                available: s.available,
                required: s.required,
            })
    }
}

pub fn check_sufficiency(windows: &CandleWindows, requirements: &[TimeframeRequirement]) -> SufficiencyReport {
    let shortfalls = requirements
        .iter()
        .filter_map(|req| {
            let available = windows.get(&req.timeframe).map(Vec::len).unwrap_or(0);
            (available < req.min_bars).then_some(Shortfall {
                timeframe: req.timeframe,
                available,
                required: req.min_bars,
                critical: req.critical,
            })
        })
        .collect();
    SufficiencyReport { shortfalls }
}

/// Consecutive critical sufficiency failures per symbol
#[derive(Debug)]
pub struct SufficiencyTracker {
    alert_threshold: u32,
    consecutive: DashMap<String, u32>,
}

impl SufficiencyTracker {
    pub fn new(alert_threshold: u32) -> Self {
        Self {
            alert_threshold: alert_threshold.max(1),
            consecutive: DashMap::new(),
        }
    }

    /// Record a failure; returns the streak length and whether it just
    /// reached the alert threshold.
    pub fn record_failure(&self, symbol: &str) -> (u32, bool) {
        let mut streak = self.consecutive.entry(symbol.to_string()).or_insert(0);
        *streak += 1;
        (*streak, *streak == self.alert_threshold)
    }

    pub fn record_success(&self, symbol: &str) {
        self.consecutive.remove(symbol);
    }

    pub fn streak(&self, symbol: &str) -> u32 {
        self.consecutive.get(symbol).map(|s| *s).unwrap_or(0)
    }

    /// Symbols at or above the alert threshold, sorted
    pub fn persistent_gaps(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .consecutive
            .iter()
            .filter(|entry| *entry.value() >= self.alert_threshold)
            .map(|entry| entry.key().clone())
            .collect();
        symbols.sort();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use state_context::testing::candle_series;

    fn requirement(timeframe: Timeframe, min_bars: usize, critical: bool) -> TimeframeRequirement {
        TimeframeRequirement {
            timeframe,
            fetch_limit: min_bars * 2,
            min_bars,
            critical,
        }
    }

    #[test]
    fn test_critical_shortfall_blocks() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let mut windows = CandleWindows::new();
        windows.insert(Timeframe::H1, candle_series("BTCUSDT", Timeframe::H1, 10, now));

        let report = check_sufficiency(&windows, &[requirement(Timeframe::H1, 24, true)]);
        assert!(!report.is_sufficient());
        match report.to_error("BTCUSDT") {
            Some(SchedulerError::InsufficientData { available, required, .. }) => {
                assert_eq!((available, required), (10, 24));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_optional_shortfall_only_degrades() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let mut windows = CandleWindows::new();
        windows.insert(Timeframe::H1, candle_series("BTCUSDT", Timeframe::H1, 24, now));

        let report = check_sufficiency(
            &windows,
            &[
                requirement(Timeframe::H1, 24, true),
                requirement(Timeframe::M5, 20, false),
            ],
        );
        assert!(report.is_sufficient());
        assert!(report.is_degraded());
        assert_eq!(report.shortfalls[0].available, 0);
        assert!(report.to_error("BTCUSDT").is_none());
    }

    #[test]
    fn test_tracker_alerts_once_at_threshold() {
        let tracker = SufficiencyTracker::new(3);
        assert_eq!(tracker.record_failure("BTCUSDT"), (1, false));
        assert_eq!(tracker.record_failure("BTCUSDT"), (2, false));
        assert_eq!(tracker.record_failure("BTCUSDT"), (3, true));
        assert_eq!(tracker.record_failure("BTCUSDT"), (4, false));
        assert_eq!(tracker.persistent_gaps(), vec!["BTCUSDT".to_string()]);

        tracker.record_success("BTCUSDT");
        assert_eq!(tracker.streak("BTCUSDT"), 0);
        assert!(tracker.persistent_gaps().is_empty());
    }
}
