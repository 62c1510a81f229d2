//! Background Refresh Scheduler
//!
//! Four independent periodic loops keep context tiers warm:
//!
//! | Loop | Period | Tier |
//! |---|---|---|
//! | candles | 60s | candles |
//! | volatility | 3600s | volatility |
//! | levels | next 00:00 UTC, then daily | levels |
//! | market_condition | 900s | market condition |
//!
//! Each pass walks the symbols known to the coordinator when the pass starts
//! and refreshes one tier per symbol; per-symbol failures are counted and
//! logged without ending the pass. Every loop runs under a supervisor task
//! that restarts it after a panic, so one crashing loop never stops the
//! others or leaves its tier unrefreshed.

use crate::context::Tier;
use crate::coordinator::ContextCoordinator;
use crate::error::ContextError;
use chrono::{DateTime, Utc};
use config::RefreshSettings;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::next_utc_midnight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshLoop {
    Candles,
    Volatility,
    Levels,
    MarketCondition,
}

impl RefreshLoop {
    pub const ALL: [RefreshLoop; 4] = [
        RefreshLoop::Candles,
        RefreshLoop::Volatility,
        RefreshLoop::Levels,
        RefreshLoop::MarketCondition,
    ];

    pub fn tier(&self) -> Tier {
        match self {
            RefreshLoop::Candles => Tier::Candles,
            RefreshLoop::Volatility => Tier::Volatility,
            RefreshLoop::Levels => Tier::Levels,
            RefreshLoop::MarketCondition => Tier::MarketCondition,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshLoop::Candles => "candles",
            RefreshLoop::Volatility => "volatility",
            RefreshLoop::Levels => "levels",
            RefreshLoop::MarketCondition => "market_condition",
        }
    }

    fn index(&self) -> usize {
        match self {
            RefreshLoop::Candles => 0,
            RefreshLoop::Volatility => 1,
            RefreshLoop::Levels => 2,
            RefreshLoop::MarketCondition => 3,
        }
    }
}

impl fmt::Display for RefreshLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time to wait before the next pass of `kind`, measured from `now`.
///
/// The level loop always targets the next UTC midnight so it cannot drift.
pub fn loop_delay(kind: RefreshLoop, settings: &RefreshSettings, now: DateTime<Utc>) -> Duration {
    match kind {
        RefreshLoop::Candles => Duration::from_secs(settings.candle_interval_secs),
        RefreshLoop::Volatility => Duration::from_secs(settings.volatility_interval_secs),
        RefreshLoop::MarketCondition => Duration::from_secs(settings.condition_interval_secs),
        RefreshLoop::Levels => (next_utc_midnight(now) - now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    }
}

/// Outcome of one pass over the known symbols
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub refresh_loop: RefreshLoop,
    pub symbols: usize,
    pub refreshed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct LoopCounters {
    alive: AtomicBool,
    passes: AtomicU64,
    symbol_refreshes: AtomicU64,
    symbol_failures: AtomicU64,
    restarts: AtomicU64,
    last_pass_at: Mutex<Option<DateTime<Utc>>>,
    next_run_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopStats {
    pub refresh_loop: RefreshLoop,
    pub alive: bool,
    pub passes: u64,
    pub symbol_refreshes: u64,
    pub symbol_failures: u64,
    pub restarts: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefresherStats {
    pub running: bool,
    pub loops: Vec<LoopStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefresherHealth {
    /// Running with every loop task alive
    pub healthy: bool,
    pub running: bool,
    pub dead_loops: Vec<RefreshLoop>,
}

/// State shared by the supervisors and their loops
struct LoopContext {
    coordinator: Arc<ContextCoordinator>,
    settings: RefreshSettings,
    counters: [LoopCounters; 4],
}

impl LoopContext {
    fn counters(&self, kind: RefreshLoop) -> &LoopCounters {
        &self.counters[kind.index()]
    }

    async fn run_pass(&self, kind: RefreshLoop) -> PassReport {
        let symbols = self.coordinator.symbols();
        let counters = self.counters(kind);
        let mut report = PassReport {
            refresh_loop: kind,
            symbols: symbols.len(),
            refreshed: 0,
            failed: 0,
        };

        for symbol in &symbols {
            match self.coordinator.refresh_tier(symbol, kind.tier()).await {
                Ok(()) => report.refreshed += 1,
                Err(ContextError::UnknownSymbol(_)) => {
                    debug!(refresh_loop = %kind, symbol = %symbol, "Symbol evicted during pass");
                }
                Err(e) => {
                    report.failed += 1;
                    counters.symbol_failures.fetch_add(1, Ordering::Relaxed);
                    *counters.last_error.lock() = Some(format!("{}: {}", symbol, e));
                    warn!(refresh_loop = %kind, symbol = %symbol, error = %e, "Background refresh failed");
                }
            }
        }

        counters.passes.fetch_add(1, Ordering::Relaxed);
        counters
            .symbol_refreshes
            .fetch_add(report.refreshed as u64, Ordering::Relaxed);
        *counters.last_pass_at.lock() = Some(self.coordinator.clock().now());

        debug!(
            refresh_loop = %kind,
            symbols = report.symbols,
            refreshed = report.refreshed,
            failed = report.failed,
            "Refresh pass complete"
        );
        report
    }
}

/// Supervised background refresh loops
pub struct BackgroundRefresher {
    context: Arc<LoopContext>,
    shutdown_tx: watch::Sender<bool>,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl BackgroundRefresher {
    pub fn new(coordinator: Arc<ContextCoordinator>, settings: RefreshSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            context: Arc::new(LoopContext {
                coordinator,
                settings,
                counters: Default::default(),
            }),
            shutdown_tx,
            supervisors: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the four supervised loops. Returns false when refresh is
    /// disabled or the loops are already running.
    pub fn start(&self) -> bool {
        if !self.context.settings.enabled {
            info!("Background refresh disabled by configuration");
            return false;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Background refresh already running");
            return false;
        }

        self.shutdown_tx.send_replace(false);
        let mut supervisors = self.supervisors.lock();
        for kind in RefreshLoop::ALL {
            let context = self.context.clone();
            let shutdown = self.shutdown_tx.subscribe();
            supervisors.push(tokio::spawn(supervise(kind, context, shutdown)));
        }
        info!("🔁 Started {} background refresh loops", supervisors.len());
        true
    }

    /// Signal every loop to stop and wait for them to exit
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(true);
        let supervisors = std::mem::take(&mut *self.supervisors.lock());
        for supervisor in supervisors {
            if let Err(e) = supervisor.await {
                warn!("Refresh supervisor ended abnormally: {}", e);
            }
        }
        info!("🛑 Background refresh loops stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one pass of `kind` immediately, outside the loop schedule
    pub async fn run_pass(&self, kind: RefreshLoop) -> PassReport {
        self.context.run_pass(kind).await
    }

    pub fn stats(&self) -> RefresherStats {
        let loops = RefreshLoop::ALL
            .iter()
            .map(|kind| {
                let c = self.context.counters(*kind);
                LoopStats {
                    refresh_loop: *kind,
                    alive: c.alive.load(Ordering::SeqCst),
                    passes: c.passes.load(Ordering::Relaxed),
                    symbol_refreshes: c.symbol_refreshes.load(Ordering::Relaxed),
                    symbol_failures: c.symbol_failures.load(Ordering::Relaxed),
                    restarts: c.restarts.load(Ordering::Relaxed),
                    last_pass_at: *c.last_pass_at.lock(),
                    next_run_at: *c.next_run_at.lock(),
                    last_error: c.last_error.lock().clone(),
                }
            })
            .collect();
        RefresherStats {
            running: self.is_running(),
            loops,
        }
    }

    pub fn health(&self) -> RefresherHealth {
        let running = self.is_running();
        let dead_loops: Vec<RefreshLoop> = RefreshLoop::ALL
            .into_iter()
            .filter(|kind| !self.context.counters(*kind).alive.load(Ordering::SeqCst))
            .collect();
        RefresherHealth {
            healthy: running && dead_loops.is_empty(),
            running,
            dead_loops,
        }
    }
}

async fn supervise(kind: RefreshLoop, context: Arc<LoopContext>, mut shutdown: watch::Receiver<bool>) {
    let backoff = Duration::from_secs(context.settings.restart_backoff_secs);
    context.counters(kind).alive.store(true, Ordering::SeqCst);

    loop {
        let worker = tokio::spawn(run_loop(kind, context.clone(), shutdown.clone()));
        match worker.await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                let counters = context.counters(kind);
                let restarts = counters.restarts.fetch_add(1, Ordering::Relaxed) + 1;
                let message = panic_message(e.into_panic());
                *counters.last_error.lock() = Some(format!("panic: {}", message));
                error!(
                    refresh_loop = %kind,
                    restarts,
                    "💥 Refresh loop panicked: {}. Restarting in {:?}",
                    message,
                    backoff
                );

                let closed = tokio::select! {
                    changed = shutdown.changed() => changed.is_err(),
                    _ = tokio::time::sleep(backoff) => false,
                };
                if closed || *shutdown.borrow() {
                    break;
                }
            }
            Err(e) => {
                warn!(refresh_loop = %kind, "Refresh loop cancelled: {}", e);
                break;
            }
        }
    }

    context.counters(kind).alive.store(false, Ordering::SeqCst);
}

async fn run_loop(kind: RefreshLoop, context: Arc<LoopContext>, mut shutdown: watch::Receiver<bool>) {
    debug!(refresh_loop = %kind, "Refresh loop running");
    let clock = context.coordinator.clock();

    loop {
        let now = clock.now();
        let delay = loop_delay(kind, &context.settings, now);
        *context.counters(kind).next_run_at.lock() = chrono::Duration::from_std(delay)
            .ok()
            .map(|d| now + d);

        let closed = tokio::select! {
            changed = shutdown.changed() => changed.is_err(),
            _ = tokio::time::sleep(delay) => false,
        };
        if closed || *shutdown.borrow() {
            break;
        }

        context.run_pass(kind).await;
    }

    debug!(refresh_loop = %kind, "Refresh loop exiting");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seeded_repository, AnalyzerKind, CountingAnalyzers};
    use chrono::TimeZone;
    use config::CacheSettings;
    use types::ManualClock;

    fn coordinator(
        analyzers: Arc<CountingAnalyzers>,
    ) -> (Arc<ManualClock>, Arc<ContextCoordinator>) {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::shared(now);
        let repository = Arc::new(seeded_repository(&["BTCUSDT", "ETHUSDT"], now));
        let coordinator = Arc::new(ContextCoordinator::new(
            repository,
            analyzers,
            CacheSettings::default(),
            clock.clone(),
        ));
        (clock, coordinator)
    }

    #[test]
    fn test_level_loop_waits_for_midnight() {
        let settings = RefreshSettings::default();
        let late = Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap();
        assert_eq!(
            loop_delay(RefreshLoop::Levels, &settings, late),
            Duration::from_secs(3_600)
        );
        assert_eq!(
            loop_delay(RefreshLoop::Candles, &settings, late),
            Duration::from_secs(60)
        );
        assert_eq!(
            loop_delay(RefreshLoop::MarketCondition, &settings, late),
            Duration::from_secs(900)
        );
    }

    #[tokio::test]
    async fn test_pass_touches_only_its_tier() {
        let analyzers = Arc::new(CountingAnalyzers::new());
        let (clock, coordinator) = coordinator(analyzers.clone());
        coordinator.get_context("BTCUSDT", false).await.unwrap();
        coordinator.get_context("ETHUSDT", false).await.unwrap();
        let before = coordinator.snapshot("BTCUSDT").unwrap();

        clock.advance(chrono::Duration::seconds(5));
        let refresher = BackgroundRefresher::new(coordinator.clone(), RefreshSettings::default());
        let report = refresher.run_pass(RefreshLoop::Volatility).await;

        assert_eq!(report.symbols, 2);
        assert_eq!(report.refreshed, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(analyzers.calls(AnalyzerKind::Volatility), 4);

        let after = coordinator.snapshot("BTCUSDT").unwrap();
        assert!(after.refreshed_at(Tier::Volatility) > before.refreshed_at(Tier::Volatility));
        for tier in [Tier::Candles, Tier::Levels, Tier::MarketCondition] {
            assert_eq!(after.refreshed_at(tier), before.refreshed_at(tier));
        }
        assert!(Arc::ptr_eq(
            after.levels.as_ref().unwrap(),
            before.levels.as_ref().unwrap()
        ));
    }

    #[tokio::test]
    async fn test_pass_records_symbol_failures() {
        let analyzers = Arc::new(CountingAnalyzers::new());
        let (_clock, coordinator) = coordinator(analyzers.clone());
        coordinator.get_context("BTCUSDT", false).await.unwrap();

        analyzers.fail(AnalyzerKind::Levels);
        let refresher = BackgroundRefresher::new(coordinator, RefreshSettings::default());
        let report = refresher.run_pass(RefreshLoop::Levels).await;

        assert_eq!(report.failed, 1);
        let stats = refresher.stats();
        let levels = &stats.loops[RefreshLoop::Levels.index()];
        assert_eq!(levels.passes, 1);
        assert_eq!(levels.symbol_failures, 1);
        assert!(levels.last_error.as_deref().unwrap_or("").starts_with("BTCUSDT"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_loop_is_restarted() {
        let analyzers = Arc::new(CountingAnalyzers::new());
        let (_clock, coordinator) = coordinator(analyzers.clone());
        coordinator.get_context("BTCUSDT", false).await.unwrap();
        analyzers.panic_on(AnalyzerKind::Volatility);

        let settings = RefreshSettings {
            volatility_interval_secs: 1,
            restart_backoff_secs: 1,
            ..RefreshSettings::default()
        };
        let refresher = BackgroundRefresher::new(coordinator.clone(), settings);
        assert!(refresher.start());
        assert!(!refresher.start());

        tokio::time::sleep(Duration::from_secs(10)).await;

        let stats = refresher.stats();
        let volatility = &stats.loops[RefreshLoop::Volatility.index()];
        assert!(volatility.restarts >= 2, "restarts = {}", volatility.restarts);
        assert!(volatility.alive);
        assert!(refresher.health().healthy);

        // sibling loops are unaffected
        let candles = &stats.loops[RefreshLoop::Candles.index()];
        assert_eq!(candles.restarts, 0);
        assert!(candles.alive);

        analyzers.recover(AnalyzerKind::Volatility);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(refresher.stats().loops[RefreshLoop::Volatility.index()].passes >= 1);

        refresher.stop().await;
        let health = refresher.health();
        assert!(!health.healthy);
        assert_eq!(health.dead_loops.len(), 4);
    }

    #[tokio::test]
    async fn test_disabled_refresher_does_not_start() {
        let analyzers = Arc::new(CountingAnalyzers::new());
        let (_clock, coordinator) = coordinator(analyzers);
        let settings = RefreshSettings {
            enabled: false,
            ..RefreshSettings::default()
        };
        let refresher = BackgroundRefresher::new(coordinator, settings);
        assert!(!refresher.start());
        assert!(!refresher.health().healthy);
    }
}
