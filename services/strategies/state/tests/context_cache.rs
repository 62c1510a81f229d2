//! Cache coordinator behaviour under time, concurrency and failure

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use config::CacheSettings;
use futures::future::join_all;
use state_context::testing::{seeded_repository, AnalyzerKind, CountingAnalyzers};
use state_context::{ContextCoordinator, InMemoryRepository, Repository, Tier};
use std::sync::Arc;
use std::time::Duration;
use types::{Candle, ManualClock, Timeframe};

/// Fails every read of one timeframe and serves the rest from memory
struct BrokenTimeframe {
    inner: InMemoryRepository,
    broken: Timeframe,
}

#[async_trait]
impl Repository for BrokenTimeframe {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        if timeframe == self.broken {
            bail!("{} {} table unavailable", symbol, timeframe);
        }
        self.inner.get_candles(symbol, timeframe, start, limit).await
    }
}

fn build(
    symbols: &[&str],
    analyzers: Arc<CountingAnalyzers>,
    start: chrono::DateTime<Utc>,
) -> (Arc<ManualClock>, Arc<ContextCoordinator>) {
    let clock = ManualClock::shared(start);
    let repository = Arc::new(seeded_repository(symbols, start));
    let coordinator = Arc::new(ContextCoordinator::new(
        repository,
        analyzers,
        CacheSettings::default(),
        clock.clone(),
    ));
    (clock, coordinator)
}

#[tokio::test]
async fn test_refreshing_one_tier_leaves_others_untouched() {
    let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
    let (clock, coordinator) = build(&["BTCUSDT"], Arc::new(CountingAnalyzers::new()), start);
    let before = coordinator.get_context("BTCUSDT", false).await.unwrap();

    clock.advance(ChronoDuration::seconds(30));
    coordinator.refresh_tier("BTCUSDT", Tier::Levels).await.unwrap();
    let after = coordinator.snapshot("BTCUSDT").unwrap();

    assert!(after.refreshed_at(Tier::Levels) > before.refreshed_at(Tier::Levels));
    for tier in [Tier::Candles, Tier::Volatility, Tier::MarketCondition] {
        assert_eq!(after.refreshed_at(tier), before.refreshed_at(tier), "{}", tier);
    }
    assert!(Arc::ptr_eq(
        after.candles.as_ref().unwrap(),
        before.candles.as_ref().unwrap()
    ));
    assert!(Arc::ptr_eq(
        after.volatility.as_ref().unwrap(),
        before.volatility.as_ref().unwrap()
    ));

    // readers holding the old snapshot are unaffected
    assert_eq!(before.update_count, 4);
    assert_eq!(after.update_count, 5);
}

#[tokio::test]
async fn test_fresh_tiers_never_invoke_analyzers() {
    let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
    let analyzers = Arc::new(CountingAnalyzers::new());
    let (clock, coordinator) = build(&["BTCUSDT", "ETHUSDT"], analyzers.clone(), start);

    coordinator.get_context("BTCUSDT", false).await.unwrap();
    coordinator.get_context("ETHUSDT", false).await.unwrap();
    let baseline = analyzers.total_calls();

    // every tier is still inside its TTL for the whole minute
    for _ in 0..59 {
        clock.advance(ChronoDuration::seconds(1));
        coordinator.get_context("BTCUSDT", false).await.unwrap();
        coordinator.get_context("ETHUSDT", false).await.unwrap();
    }
    assert_eq!(analyzers.total_calls(), baseline);

    // candle expiry touches the repository only
    clock.advance(ChronoDuration::seconds(1));
    let ctx = coordinator.get_context("BTCUSDT", false).await.unwrap();
    assert_eq!(analyzers.total_calls(), baseline);
    assert_eq!(ctx.refreshed_at(Tier::Candles), Some(start + ChronoDuration::seconds(60)));

    // condition expires after 15 minutes, volatility after an hour
    clock.set(start + ChronoDuration::minutes(15));
    coordinator.get_context("BTCUSDT", false).await.unwrap();
    assert_eq!(analyzers.calls(AnalyzerKind::MarketCondition), 3);
    assert_eq!(analyzers.calls(AnalyzerKind::Volatility), 2);

    clock.set(start + ChronoDuration::minutes(60));
    coordinator.get_context("BTCUSDT", false).await.unwrap();
    assert_eq!(analyzers.calls(AnalyzerKind::Volatility), 3);
    assert_eq!(analyzers.calls(AnalyzerKind::Levels), 2);
}

#[tokio::test]
async fn test_levels_come_due_at_the_same_midnight() {
    let morning = Utc.with_ymd_and_hms(2024, 6, 3, 1, 0, 0).unwrap();
    let evening = Utc.with_ymd_and_hms(2024, 6, 3, 23, 0, 0).unwrap();
    let midnight = Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap();

    let analyzers = Arc::new(CountingAnalyzers::new());
    let (clock, coordinator) = build(&["BTCUSDT", "ETHUSDT"], analyzers.clone(), morning);

    coordinator.get_context("BTCUSDT", false).await.unwrap();
    clock.set(evening);
    coordinator.get_context("ETHUSDT", false).await.unwrap();
    assert_eq!(analyzers.calls(AnalyzerKind::Levels), 2);

    let policy = *coordinator.policy();
    for symbol in ["BTCUSDT", "ETHUSDT"] {
        let ctx = coordinator.snapshot(symbol).unwrap();
        let populated = ctx.refreshed_at(Tier::Levels).unwrap();
        assert_eq!(policy.due_at(Tier::Levels, populated), midnight, "{}", symbol);
    }

    // BTCUSDT's levels are 22h59m old but still valid
    clock.set(midnight - ChronoDuration::seconds(1));
    coordinator.get_context("BTCUSDT", false).await.unwrap();
    coordinator.get_context("ETHUSDT", false).await.unwrap();
    assert_eq!(analyzers.calls(AnalyzerKind::Levels), 2);

    // both expire together
    clock.set(midnight + ChronoDuration::seconds(1));
    coordinator.get_context("BTCUSDT", false).await.unwrap();
    coordinator.get_context("ETHUSDT", false).await.unwrap();
    assert_eq!(analyzers.calls(AnalyzerKind::Levels), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_reads_share_one_refresh() {
    let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
    let analyzers = Arc::new(CountingAnalyzers::with_delay(Duration::from_millis(25)));
    let (_clock, coordinator) = build(&["SOLUSDT"], analyzers.clone(), start);

    let tasks = (0..32).map(|_| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.get_context("SOLUSDT", false).await })
    });
    for result in join_all(tasks).await {
        let ctx = result.unwrap().unwrap();
        assert!(ctx.is_fully_initialized());
    }

    for kind in AnalyzerKind::ALL {
        assert_eq!(analyzers.calls(kind), 1, "{:?}", kind);
    }
    let stats = coordinator.stats();
    assert_eq!(stats.contexts, 1);
    assert_eq!(stats.contexts_created, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stale_reads_share_one_refresh() {
    let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
    let analyzers = Arc::new(CountingAnalyzers::with_delay(Duration::from_millis(25)));
    let (clock, coordinator) = build(&["SOLUSDT"], analyzers.clone(), start);
    coordinator.get_context("SOLUSDT", false).await.unwrap();

    clock.advance(ChronoDuration::minutes(61));
    let tasks = (0..32).map(|_| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.get_context("SOLUSDT", false).await })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(analyzers.calls(AnalyzerKind::Volatility), 2);
    assert_eq!(analyzers.calls(AnalyzerKind::MarketCondition), 2);
    assert_eq!(analyzers.calls(AnalyzerKind::Levels), 1);
    assert!(coordinator.stats().coalesced_refreshes > 0);
}

#[tokio::test]
async fn test_failed_levels_do_not_block_candles() {
    let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
    let analyzers = Arc::new(CountingAnalyzers::new());
    analyzers.fail(AnalyzerKind::Levels);
    let (_clock, coordinator) = build(&["BTCUSDT"], analyzers.clone(), start);

    let ctx = coordinator.get_context("BTCUSDT", true).await.unwrap();

    assert!(ctx.candles.is_some());
    assert!(!ctx.candles(types::Timeframe::H1).is_empty());
    assert!(ctx.levels.is_none());
    // volatility ran against the (empty) committed levels
    assert!(ctx.volatility.is_some());
    assert_eq!(ctx.volatility_data().unwrap().structural_range, None);
    assert!(ctx.market_condition.is_some());
    assert!(!ctx.is_fully_initialized());
    assert_eq!(ctx.error_count, 1);

    let stats = coordinator.stats();
    assert_eq!(stats.tiers[&Tier::Levels].failures, 1);
    assert_eq!(stats.tiers[&Tier::Candles].successes, 1);
}

#[tokio::test]
async fn test_analyzer_timeout_is_a_tier_failure() {
    let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
    let clock = ManualClock::shared(start);
    let analyzers = Arc::new(CountingAnalyzers::with_delay(Duration::from_millis(200)));
    let settings = CacheSettings {
        analyzer_timeout_ms: 20,
        ..CacheSettings::default()
    };
    let coordinator = ContextCoordinator::new(
        Arc::new(seeded_repository(&["BTCUSDT"], start)),
        analyzers,
        settings,
        clock,
    );

    let ctx = coordinator.get_context("BTCUSDT", false).await.unwrap();
    assert!(ctx.candles.is_some());
    assert!(ctx.levels.is_none());
    assert!(ctx
        .last_error
        .as_deref()
        .unwrap_or("")
        .contains("timed out"));
}

#[tokio::test]
async fn test_one_failed_timeframe_keeps_the_other_windows() {
    let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
    let repository = Arc::new(BrokenTimeframe {
        inner: seeded_repository(&["BTCUSDT"], start),
        broken: Timeframe::H4,
    });
    let coordinator = ContextCoordinator::new(
        repository,
        Arc::new(CountingAnalyzers::new()),
        CacheSettings::default(),
        ManualClock::shared(start),
    );

    let ctx = coordinator.get_context("BTCUSDT", false).await.unwrap();

    assert!(ctx.candles.is_some());
    assert!(ctx.candles(Timeframe::H4).is_empty());
    assert!(!ctx.candles(Timeframe::H1).is_empty());
    assert!(!ctx.candles(Timeframe::M5).is_empty());
    assert!(ctx.market_condition.is_some());
    assert!(ctx.is_fully_initialized());
    assert_eq!(coordinator.stats().tiers[&Tier::Candles].successes, 1);
}

#[tokio::test]
async fn test_every_timeframe_failing_fails_the_candle_tier() {
    let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
    let settings = CacheSettings {
        candle_windows: vec![config::CandleWindowSpec {
            timeframe: Timeframe::H4,
            limit: 24,
        }],
        ..CacheSettings::default()
    };
    let coordinator = ContextCoordinator::new(
        Arc::new(BrokenTimeframe {
            inner: seeded_repository(&["BTCUSDT"], start),
            broken: Timeframe::H4,
        }),
        Arc::new(CountingAnalyzers::new()),
        settings,
        ManualClock::shared(start),
    );

    let ctx = coordinator.get_context("BTCUSDT", false).await.unwrap();

    assert!(ctx.candles.is_none());
    assert_eq!(coordinator.stats().tiers[&Tier::Candles].failures, 1);
}
