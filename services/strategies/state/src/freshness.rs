//! Tier freshness rules
//!
//! Candle, volatility and market-condition tiers expire a fixed TTL after
//! their last refresh. The level tier stays valid until the first UTC midnight
//! after it was computed, so every symbol's levels come due in the same daily
//! window regardless of when they were populated.

use crate::context::Tier;
use chrono::{DateTime, Duration, Utc};
use config::CacheSettings;
use types::next_utc_midnight;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub candles_ttl: Duration,
    pub volatility_ttl: Duration,
    pub condition_ttl: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

impl FreshnessPolicy {
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            candles_ttl: Duration::seconds(settings.candles_ttl_secs as i64),
            volatility_ttl: Duration::seconds(settings.volatility_ttl_secs as i64),
            condition_ttl: Duration::seconds(settings.condition_ttl_secs as i64),
        }
    }

    /// Instant at which a tier refreshed at `refreshed_at` becomes stale
    pub fn due_at(&self, tier: Tier, refreshed_at: DateTime<Utc>) -> DateTime<Utc> {
        match tier {
            Tier::Candles => refreshed_at + self.candles_ttl,
            Tier::Levels => next_utc_midnight(refreshed_at),
            Tier::Volatility => refreshed_at + self.volatility_ttl,
            Tier::MarketCondition => refreshed_at + self.condition_ttl,
        }
    }

    /// A never-populated tier is always invalid.
    pub fn is_valid(
        &self,
        tier: Tier,
        refreshed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        refreshed_at
            .map(|at| now < self.due_at(tier, at))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ttl_boundaries() {
        let policy = FreshnessPolicy::default();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        assert!(policy.is_valid(Tier::Candles, Some(at), at + Duration::seconds(59)));
        assert!(!policy.is_valid(Tier::Candles, Some(at), at + Duration::seconds(60)));
        assert!(policy.is_valid(Tier::Volatility, Some(at), at + Duration::minutes(59)));
        assert!(!policy.is_valid(Tier::Volatility, Some(at), at + Duration::hours(1)));
        assert!(policy.is_valid(Tier::MarketCondition, Some(at), at + Duration::minutes(14)));
        assert!(!policy.is_valid(Tier::MarketCondition, Some(at), at + Duration::minutes(15)));
        assert!(!policy.is_valid(Tier::Candles, None, at));
    }

    #[test]
    fn test_levels_expire_at_midnight() {
        let policy = FreshnessPolicy::default();
        let morning = Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();

        assert_eq!(policy.due_at(Tier::Levels, morning), midnight);
        assert_eq!(policy.due_at(Tier::Levels, evening), midnight);
        assert!(policy.is_valid(Tier::Levels, Some(evening), midnight - Duration::seconds(1)));
        assert!(!policy.is_valid(Tier::Levels, Some(morning), midnight));
    }
}
