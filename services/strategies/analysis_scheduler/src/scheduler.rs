//! # Analysis Scheduler - Clock-Synchronized Strategy Cycles
//!
//! ## Purpose
//!
//! Runs every configured strategy over every configured symbol once per
//! interval. The first cycle is aligned to a fixed second of the minute so
//! analysis stays clear of upstream candle writes; later cycles follow on a
//! fixed cadence from that anchor.
//!
//! ## Cycle Protocol
//!
//! ```text
//! align to :SS ──→ [cycle N] ──join──→ stats/history/health ──sleep──→ [cycle N+1]
//!                      │
//!         per symbol (one task each, all concurrent)
//!                      │
//!   context ← coordinator      windows ← repository (fresh, per timeframe)
//!                      │
//!               sufficiency check ── critical shortfall → skip symbol
//!                      │
//!   per strategy (global semaphore) → analyze → sink.submit
//! ```
//!
//! Cycles never overlap: the next one starts only after the previous fan-out
//! has joined, and a cycle that overruns the interval is followed
//! immediately instead of drifting further. Strategy, sink and sufficiency
//! failures stay inside their symbol; a failed join enters `Error`, waits out
//! the cooldown and resumes.

use crate::error::{Result, SchedulerError};
use crate::stats::{CycleStats, SchedulerStats, StatsRecorder, SymbolResult};
use crate::status::{SchedulerStatus, StatusCell};
use crate::sufficiency::{check_sufficiency, SufficiencyTracker};
use chrono::{DateTime, Utc};
use config::SchedulerSettings;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use state_context::{AnalyticalContext, ContextCoordinator, Repository};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strategy_shared::{SignalSink, Strategy};
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use types::{delay_until_second_offset, CandleWindows, SharedClock};

const CYCLE_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerHealth {
    pub healthy: bool,
    pub status: SchedulerStatus,
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Symbol tasks of the cycle in flight
    pub active_tasks: usize,
    pub errors: u64,
    /// Symbols with consecutive critical sufficiency failures at the alert threshold
    pub persistent_data_gaps: Vec<String>,
}

struct SchedulerInner {
    settings: SchedulerSettings,
    symbols: Vec<String>,
    coordinator: Arc<ContextCoordinator>,
    repository: Arc<dyn Repository>,
    strategies: Vec<Arc<dyn Strategy>>,
    sink: Arc<dyn SignalSink>,
    clock: SharedClock,
    status: StatusCell,
    permits: Semaphore,
    stats: StatsRecorder,
    sufficiency: SufficiencyTracker,
    cycle_tx: broadcast::Sender<CycleStats>,
    /// Held for the whole of a cycle
    cycle_lock: tokio::sync::Mutex<()>,
    cycle_seq: AtomicU64,
    active_tasks: AtomicUsize,
    started_at: Mutex<Option<DateTime<Utc>>>,
    last_cycle_at: Mutex<Option<DateTime<Utc>>>,
}

pub struct AnalysisScheduler {
    inner: Arc<SchedulerInner>,
    shutdown_tx: watch::Sender<bool>,
    cycle_task: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisScheduler {
    pub fn new(
        settings: SchedulerSettings,
        coordinator: Arc<ContextCoordinator>,
        repository: Arc<dyn Repository>,
        strategies: Vec<Arc<dyn Strategy>>,
        sink: Arc<dyn SignalSink>,
    ) -> Self {
        let symbols = settings
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        let stats = StatsRecorder::new(
            strategies.iter().map(|s| s.name()),
            settings.history_capacity,
        );
        let (cycle_tx, _) = broadcast::channel(CYCLE_EVENT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let clock = coordinator.clock();

        Self {
            inner: Arc::new(SchedulerInner {
                permits: Semaphore::new(settings.max_concurrent_analyses.max(1)),
                sufficiency: SufficiencyTracker::new(settings.sufficiency_alert_threshold),
                symbols,
                coordinator,
                repository,
                strategies,
                sink,
                clock,
                status: StatusCell::new(),
                stats,
                cycle_tx,
                cycle_lock: tokio::sync::Mutex::new(()),
                cycle_seq: AtomicU64::new(0),
                active_tasks: AtomicUsize::new(0),
                started_at: Mutex::new(None),
                last_cycle_at: Mutex::new(None),
                settings,
            }),
            shutdown_tx,
            cycle_task: Mutex::new(None),
        }
    }

    /// Validate collaborators, warm every symbol's context and spawn the
    /// cycle loop. Startup errors leave the scheduler stopped.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.strategies.is_empty() {
            error!("❌ Cannot start analysis scheduler: no strategies configured");
            return Err(SchedulerError::NoStrategies);
        }
        if inner.symbols.is_empty() {
            error!("❌ Cannot start analysis scheduler: no symbols configured");
            return Err(SchedulerError::NoSymbols);
        }
        if !inner
            .status
            .transition_from(&[SchedulerStatus::Idle, SchedulerStatus::Stopped], SchedulerStatus::Starting)
        {
            return Err(SchedulerError::AlreadyRunning(inner.status.get()));
        }

        info!(
            symbols = ?inner.symbols,
            strategies = inner.strategies.len(),
            interval_secs = inner.settings.interval_secs,
            offset = inner.settings.start_second_offset,
            "🚀 Starting analysis scheduler"
        );

        let warmed = join_all(
            inner
                .symbols
                .iter()
                .map(|symbol| inner.coordinator.get_context(symbol, false)),
        )
        .await;
        for (symbol, result) in inner.symbols.iter().zip(warmed) {
            match result {
                Ok(ctx) => debug!(symbol = %symbol, tiers = ctx.populated_tiers(), "Context warmed"),
                Err(e) => warn!(symbol = %symbol, error = %e, "Context warm-up failed"),
            }
        }

        *inner.started_at.lock() = Some(inner.clock.now());
        self.shutdown_tx.send_replace(false);
        inner.status.transition(SchedulerStatus::Running)?;

        let handle = tokio::spawn(run_cycles(inner.clone(), self.shutdown_tx.subscribe()));
        *self.cycle_task.lock() = Some(handle);
        info!("✅ Analysis scheduler running");
        Ok(())
    }

    /// Stop after the in-flight cycle, if any, has finished.
    pub async fn stop(&self) {
        let stoppable = [
            SchedulerStatus::Starting,
            SchedulerStatus::Running,
            SchedulerStatus::Analyzing,
            SchedulerStatus::Degraded,
            SchedulerStatus::Error,
        ];
        if !self.inner.status.transition_from(&stoppable, SchedulerStatus::Stopping) {
            return;
        }
        info!("🛑 Stopping analysis scheduler");
        self.shutdown_tx.send_replace(true);

        let handle = self.cycle_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Cycle task ended abnormally: {}", e);
            }
        }
        if let Err(e) = self.inner.status.transition(SchedulerStatus::Stopped) {
            warn!("{}", e);
        }

        let stats = self.inner.stats.snapshot();
        info!(
            cycles = stats.cycles,
            symbols_analyzed = stats.symbols_analyzed,
            signals = stats.signals_generated,
            errors = stats.errors,
            avg_cycle_ms = stats.avg_cycle_ms,
            uptime_secs = stats.uptime_secs,
            "📊 Final scheduler statistics"
        );
    }

    /// Run a single cycle now. Waits for any cycle already in flight.
    pub async fn run_cycle_once(&self) -> Result<CycleStats> {
        self.inner.run_cycle().await
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.status.get()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_active()
    }

    /// Receive every completed cycle's statistics
    pub fn subscribe_cycles(&self) -> broadcast::Receiver<CycleStats> {
        self.inner.cycle_tx.subscribe()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats.snapshot()
    }

    /// Rolling cycle history, oldest first
    pub fn history(&self) -> Vec<CycleStats> {
        self.inner.stats.history()
    }

    pub fn last_result(&self, symbol: &str) -> Option<SymbolResult> {
        self.inner.stats.last_result(&symbol.to_uppercase())
    }

    pub fn symbols(&self) -> &[String] {
        &self.inner.symbols
    }

    /// Healthy while running, with a cycle completed within two intervals
    /// and lifetime errors below the ceiling.
    pub fn health(&self) -> SchedulerHealth {
        let inner = &self.inner;
        let status = inner.status.get();
        let last_cycle_at = *inner.last_cycle_at.lock();
        let errors = inner.stats.errors();

        let reference = last_cycle_at.or(*inner.started_at.lock());
        let window = chrono::Duration::seconds((inner.settings.interval_secs * 2) as i64);
        let recent = reference
            .map(|at| inner.clock.now() - at < window)
            .unwrap_or(false);

        SchedulerHealth {
            healthy: status.is_active() && recent && errors < inner.settings.error_ceiling,
            status,
            last_cycle_at,
            active_tasks: inner.active_tasks.load(Ordering::SeqCst),
            errors,
            persistent_data_gaps: inner.sufficiency.persistent_gaps(),
        }
    }
}

impl SchedulerInner {
    async fn run_cycle(self: &Arc<Self>) -> Result<CycleStats> {
        let _cycle = self.cycle_lock.lock().await;
        let cycle = self.cycle_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let in_loop = self.status.transition_from(
            &[SchedulerStatus::Running, SchedulerStatus::Degraded],
            SchedulerStatus::Analyzing,
        );

        let started = Instant::now();
        let started_at = self.clock.now();
        debug!(cycle, symbols = self.symbols.len(), "🔍 Cycle starting");

        let mut tasks = JoinSet::new();
        for symbol in &self.symbols {
            let inner = self.clone();
            let symbol = symbol.clone();
            tasks.spawn(async move { inner.analyze_symbol(&symbol).await });
        }
        self.active_tasks.store(self.symbols.len(), Ordering::SeqCst);

        let mut results = Vec::with_capacity(self.symbols.len());
        let mut join_failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            self.active_tasks.fetch_sub(1, Ordering::SeqCst);
            match joined {
                Ok(result) => results.push(result),
                Err(e) => join_failures.push(e.to_string()),
            }
        }
        let joined = Instant::now();
        let completed_at = self.clock.now();

        let symbols_analyzed = results.iter().filter(|r| r.success).count();
        let signals: usize = results.iter().map(|r| r.signals).sum();
        let errors: usize = results
            .iter()
            .map(|r| r.failed_strategies.len() + usize::from(r.error.is_some()))
            .sum::<usize>()
            + join_failures.len();
        let failing_strategies = self
            .strategies
            .iter()
            .filter(|s| {
                results
                    .iter()
                    .any(|r| r.failed_strategies.iter().any(|f| f == s.name()))
            })
            .count();
        let degraded = symbols_analyzed * 2 < self.symbols.len()
            || (self.strategies.len() - failing_strategies) * 2 < self.strategies.len();

        let stats = CycleStats {
            cycle,
            started_at,
            completed_at,
            elapsed_ms: joined.duration_since(started).as_millis() as u64,
            symbols_total: self.symbols.len(),
            symbols_analyzed,
            symbols_skipped: results.len() - symbols_analyzed + join_failures.len(),
            signals,
            errors,
            started,
            joined,
        };
        for result in results {
            self.stats.record_symbol(result);
        }
        self.stats.record_cycle(stats.clone());
        *self.last_cycle_at.lock() = Some(completed_at);
        // no subscribers is fine
        let _ = self.cycle_tx.send(stats.clone());

        if !join_failures.is_empty() {
            return Err(SchedulerError::CycleFailed {
                cycle,
                reason: join_failures.join("; "),
            });
        }

        if in_loop {
            let next = if degraded {
                SchedulerStatus::Degraded
            } else {
                SchedulerStatus::Running
            };
            if self.status.transition_from(&[SchedulerStatus::Analyzing], next) && degraded {
                warn!(
                    cycle,
                    symbols_analyzed,
                    failing_strategies,
                    "⚠️ Scheduler degraded: fewer than half of symbols or strategies healthy"
                );
            }
        }

        info!(
            cycle,
            symbols = stats.symbols_total,
            analyzed = stats.symbols_analyzed,
            skipped = stats.symbols_skipped,
            signals = stats.signals,
            errors = stats.errors,
            elapsed_ms = stats.elapsed_ms,
            "📊 Cycle complete"
        );
        Ok(stats)
    }

    async fn analyze_symbol(&self, symbol: &str) -> SymbolResult {
        let started = Instant::now();

        // strategies check the tiers they depend on
        let context = match self.coordinator.get_context(symbol, false).await {
            Ok(ctx) => {
                if !ctx.is_fully_initialized() {
                    debug!(
                        symbol,
                        populated = ctx.populated_tiers(),
                        last_error = ?ctx.last_error,
                        "Context partially initialized, strategies run on available tiers"
                    );
                }
                ctx
            }
            Err(e) => {
                let reason = SchedulerError::from(e).to_string();
                return self.skip(symbol, reason, false, started);
            }
        };

        let windows = self.fetch_windows(symbol).await;
        let report = check_sufficiency(&windows, &self.settings.timeframes);
        if let Some(err) = report.to_error(symbol) {
            self.stats.record_sufficiency_failure();
            let (streak, alert) = self.sufficiency.record_failure(symbol);
            if alert {
                error!(symbol, streak, "🚨 Persistent data gap: {}", err);
            }
            return self.skip(symbol, err.to_string(), true, started);
        }
        self.sufficiency.record_success(symbol);
        if report.is_degraded() {
            debug!(symbol, shortfalls = ?report.shortfalls, "Optional timeframes short, analysis degraded");
        }

        let outcomes = join_all(
            self.strategies
                .iter()
                .map(|strategy| self.run_strategy(strategy.as_ref(), symbol, &windows, &context)),
        )
        .await;

        let mut signals = 0;
        let mut failed_strategies = Vec::new();
        let mut last_error = None;
        for (strategy, outcome) in self.strategies.iter().zip(outcomes) {
            match outcome {
                Ok(true) => signals += 1,
                Ok(false) => {}
                Err(e) => {
                    self.stats.record_error();
                    warn!(symbol, strategy = strategy.name(), error = %e, "Strategy analysis failed");
                    failed_strategies.push(strategy.name().to_string());
                    last_error = Some(e.to_string());
                }
            }
        }

        let strategies_run = self.strategies.len();
        SymbolResult {
            symbol: symbol.to_string(),
            success: failed_strategies.len() < strategies_run,
            insufficient: false,
            signals,
            strategies_run,
            failed_strategies,
            elapsed_ms: started.elapsed().as_millis() as u64,
            error: last_error,
            completed_at: self.clock.now(),
        }
    }

    fn skip(&self, symbol: &str, reason: String, insufficient: bool, started: Instant) -> SymbolResult {
        self.stats.record_error();
        warn!(symbol, insufficient, "⚠️ Skipping symbol this cycle: {}", reason);
        SymbolResult::skipped(symbol, reason, insufficient, started.elapsed(), self.clock.now())
    }

    /// Fresh windows per configured timeframe, read straight from the repository.
    ///
    /// Failed or timed-out reads yield no bars; sufficiency decides what that means.
    async fn fetch_windows(&self, symbol: &str) -> CandleWindows {
        let now = self.clock.now();
        let timeout = Duration::from_millis(self.settings.repository_timeout_ms);

        let fetches = self.settings.timeframes.iter().map(|req| async move {
            let start = now - req.timeframe.lookback(req.fetch_limit);
            let read = self
                .repository
                .get_candles(symbol, req.timeframe, start, req.fetch_limit);
            let bars = match tokio::time::timeout(timeout, read).await {
                Ok(Ok(bars)) => bars,
                Ok(Err(e)) => {
                    warn!(symbol, timeframe = %req.timeframe, error = %e, "Candle read failed");
                    Vec::new()
                }
                Err(_) => {
                    warn!(symbol, timeframe = %req.timeframe, timeout_ms = timeout.as_millis() as u64, "Candle read timed out");
                    Vec::new()
                }
            };
            (req.timeframe, bars)
        });

        join_all(fetches)
            .await
            .into_iter()
            .filter(|(_, bars)| !bars.is_empty())
            .collect()
    }

    /// Returns whether a signal was delivered.
    async fn run_strategy(
        &self,
        strategy: &dyn Strategy,
        symbol: &str,
        windows: &CandleWindows,
        context: &AnalyticalContext,
    ) -> Result<bool> {
        let name = strategy.name();
        let failure = |reason: String| SchedulerError::Strategy {
            strategy: name.to_string(),
            symbol: symbol.to_string(),
            reason,
        };
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| failure(e.to_string()))?;

        let timeout = Duration::from_millis(self.settings.strategy_timeout_ms);
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, strategy.analyze(symbol, windows, context)).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(Ok(Some(signal))) => {
                debug!(symbol, strategy = name, signal_type = ?signal.signal_type, "Signal produced");
                self.sink
                    .submit(signal)
                    .await
                    .map(|()| true)
                    .map_err(|e| SchedulerError::Sink {
                        strategy: name.to_string(),
                        symbol: symbol.to_string(),
                        reason: e.to_string(),
                    })
            }
            Ok(Ok(None)) => Ok(false),
            Ok(Err(e)) => Err(failure(e.to_string())),
            Err(_) => Err(failure(format!("timed out after {}ms", timeout.as_millis()))),
        };

        if let Some(metrics) = self.stats.strategy(name) {
            match &result {
                Ok(signalled) => metrics.record_success(elapsed, *signalled),
                Err(e) => metrics.record_error(elapsed, e.to_string()),
            }
        }
        result
    }
}

async fn run_cycles(inner: Arc<SchedulerInner>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(inner.settings.interval_secs);
    let align = delay_until_second_offset(inner.clock.now(), inner.settings.start_second_offset);
    info!(
        "⏱️ First cycle aligned to second :{:02}, starting in {:?}",
        inner.settings.start_second_offset, align
    );

    let mut next_start = Instant::now() + align;
    loop {
        if wait_until(next_start, &mut shutdown).await {
            break;
        }

        let cycle_started = Instant::now();
        let outcome = inner.run_cycle().await;
        let elapsed = cycle_started.elapsed();

        if let Err(e) = outcome {
            inner.stats.record_error();
            let cooldown = Duration::from_secs(inner.settings.error_cooldown_secs);
            error!("💥 {}. Resuming in {:?}", e, cooldown);
            inner
                .status
                .transition_from(&[SchedulerStatus::Analyzing], SchedulerStatus::Error);
            if wait_until(Instant::now() + cooldown, &mut shutdown).await {
                break;
            }
            inner
                .status
                .transition_from(&[SchedulerStatus::Error], SchedulerStatus::Running);
            // the cooldown is not an overrun
            next_start = (cycle_started + interval).max(Instant::now());
            continue;
        }

        next_start = if elapsed >= interval {
            inner.stats.record_overrun();
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                interval_secs = interval.as_secs(),
                "⚠️ Cycle overran its interval, starting next cycle immediately"
            );
            Instant::now()
        } else {
            cycle_started + interval
        };
    }

    debug!("Cycle loop exiting");
}

/// Sleep until `deadline`. Returns true when shutdown was requested.
async fn wait_until(deadline: Instant, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    let closed = tokio::select! {
        changed = shutdown.changed() => changed.is_err(),
        _ = tokio::time::sleep_until(deadline) => false,
    };
    closed || *shutdown.borrow()
}
