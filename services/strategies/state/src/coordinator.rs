//! Cache Coordinator
//!
//! This module provides:
//! - Lazy per-symbol context creation with DashMap for concurrent access
//! - Tier validity checks against the [`FreshnessPolicy`]
//! - Dependency-ordered tier refresh (candles → levels → volatility → condition)
//! - Single-flight refresh: concurrent callers for the same symbol and tier
//!   collapse onto one in-flight computation and share its outcome
//! - Per-tier refresh statistics and a success-rate health signal
//!
//! Published contexts are immutable. A tier commit clones the current
//! context, swaps one [`TierSnapshot`] and publishes the result, so readers
//! holding an older `Arc` are never affected by later refreshes.

use crate::context::{AnalyticalContext, MarketConditionData, Tier, TierSnapshot};
use crate::error::{ContextError, Result};
use crate::freshness::FreshnessPolicy;
use crate::traits::{AnalyzerSet, Repository};
use config::CacheSettings;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use types::{Candle, CandleWindows, SharedClock, SystemClock, Timeframe};

/// Success rate above which the coordinator reports healthy
const HEALTHY_SUCCESS_RATE: f64 = 0.8;

/// Single-flight gate for one (symbol, tier) pair.
///
/// `attempts` is bumped after every completed computation. A caller that
/// observes a different value once it holds the gate knows someone else
/// refreshed the tier while it waited and returns the stored outcome.
struct TierFlight {
    attempts: AtomicU64,
    last_outcome: Mutex<Option<Result<()>>>,
}

impl TierFlight {
    fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
        }
    }
}

struct ContextSlot {
    current: RwLock<Arc<AnalyticalContext>>,
    initialized: OnceCell<()>,
    flights: [TierFlight; 4],
}

impl ContextSlot {
    fn new(symbol: &str, created_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            current: RwLock::new(Arc::new(AnalyticalContext::new(symbol, created_at))),
            initialized: OnceCell::new(),
            flights: std::array::from_fn(|_| TierFlight::new()),
        }
    }

    fn load(&self) -> Arc<AnalyticalContext> {
        self.current.read().clone()
    }

    /// Publish a modified copy of the current context.
    fn commit<F>(&self, update: F) -> Arc<AnalyticalContext>
    where
        F: FnOnce(&mut AnalyticalContext),
    {
        let mut guard = self.current.write();
        let mut next = AnalyticalContext::clone(&guard);
        update(&mut next);
        let next = Arc::new(next);
        *guard = next.clone();
        next
    }

    fn flight(&self, tier: Tier) -> &TierFlight {
        &self.flights[tier.index()]
    }
}

#[derive(Default)]
struct TierCounters {
    successes: AtomicU64,
    failures: AtomicU64,
    total_refresh_us: AtomicU64,
}

#[derive(Default)]
struct CoordinatorCounters {
    contexts_created: AtomicU64,
    coalesced_refreshes: AtomicU64,
    analyzer_calls: AtomicU64,
    repository_reads: AtomicU64,
    tiers: [TierCounters; 4],
}

/// Refresh statistics for one tier
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierRefreshStats {
    pub successes: u64,
    pub failures: u64,
    pub avg_refresh_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    pub contexts: usize,
    pub fully_initialized: usize,
    pub contexts_created: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub coalesced_refreshes: u64,
    pub analyzer_calls: u64,
    pub repository_reads: u64,
    pub success_rate: f64,
    pub tiers: BTreeMap<Tier, TierRefreshStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorHealth {
    pub healthy: bool,
    pub success_rate: f64,
    pub contexts: usize,
    pub contexts_with_errors: usize,
}

/// Owns every symbol's analytical context
pub struct ContextCoordinator {
    contexts: DashMap<String, Arc<ContextSlot>>,
    repository: Arc<dyn Repository>,
    analyzers: Arc<dyn AnalyzerSet>,
    settings: CacheSettings,
    policy: FreshnessPolicy,
    clock: SharedClock,
    counters: CoordinatorCounters,
}

impl ContextCoordinator {
    pub fn new(
        repository: Arc<dyn Repository>,
        analyzers: Arc<dyn AnalyzerSet>,
        settings: CacheSettings,
        clock: SharedClock,
    ) -> Self {
        let policy = FreshnessPolicy::from_settings(&settings);
        Self {
            contexts: DashMap::new(),
            repository,
            analyzers,
            settings,
            policy,
            clock,
            counters: CoordinatorCounters::default(),
        }
    }

    pub fn with_system_clock(
        repository: Arc<dyn Repository>,
        analyzers: Arc<dyn AnalyzerSet>,
        settings: CacheSettings,
    ) -> Self {
        Self::new(repository, analyzers, settings, Arc::new(SystemClock))
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    /// Get the context for `symbol`, creating and fully populating it on first
    /// use. Stale tiers are refreshed; `force_full` refreshes every tier.
    ///
    /// Partial refresh failures are recorded on the context and do not fail
    /// the call. An error is returned only when no tier is populated at all.
    pub async fn get_context(
        &self,
        symbol: &str,
        force_full: bool,
    ) -> Result<Arc<AnalyticalContext>> {
        let symbol = normalize(symbol);
        let slot = self.slot_for(&symbol);
        let was_ready = slot.initialized.initialized();

        let mut initialized_here = false;
        {
            let flag = &mut initialized_here;
            let sym = symbol.as_str();
            let slot_ref: &ContextSlot = &slot;
            slot.initialized
                .get_or_init(|| async move {
                    *flag = true;
                    self.counters
                        .contexts_created
                        .fetch_add(1, Ordering::Relaxed);
                    info!(symbol = sym, "🆕 Creating analytical context");
                    self.refresh_tiers(sym, slot_ref, &Tier::ALL, true).await;
                })
                .await;
        }

        if force_full && !initialized_here {
            self.refresh_tiers(&symbol, &slot, &Tier::ALL, true).await;
        } else if was_ready && !force_full {
            let now = self.clock.now();
            let current = slot.load();
            let stale: Vec<Tier> = Tier::ALL
                .into_iter()
                .filter(|tier| !self.policy.is_valid(*tier, current.refreshed_at(*tier), now))
                .collect();
            if !stale.is_empty() {
                debug!(symbol = %symbol, ?stale, "Refreshing stale tiers");
                self.refresh_tiers(&symbol, &slot, &stale, false).await;
            }
        }

        let context = slot.load();
        if context.populated_tiers() == 0 {
            return Err(ContextError::Unavailable {
                symbol,
                reason: context
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "no tier populated".to_string()),
            });
        }
        Ok(context)
    }

    /// Refresh exactly one tier of a known symbol, regardless of its age.
    ///
    /// Coalesces with any refresh of the same tier already in flight.
    pub async fn refresh_tier(&self, symbol: &str, tier: Tier) -> Result<()> {
        let symbol = normalize(symbol);
        let slot = self
            .contexts
            .get(&symbol)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ContextError::UnknownSymbol(symbol.clone()))?;

        if !slot.initialized.initialized() {
            // creation is populating every tier right now
            return Ok(());
        }
        self.run_tier(&symbol, &slot, tier, true).await
    }

    /// Force a full refresh of every known symbol. Returns how many symbols
    /// ended with at least one usable tier.
    pub async fn refresh_all_contexts(&self) -> usize {
        let symbols = self.symbols();
        info!("🔄 Refreshing all {} contexts", symbols.len());

        let results = join_all(
            symbols
                .iter()
                .map(|symbol| async move { (symbol, self.get_context(symbol, true).await) }),
        )
        .await;

        let mut refreshed = 0;
        for (symbol, result) in results {
            match result {
                Ok(_) => refreshed += 1,
                Err(e) => warn!(symbol = %symbol, error = %e, "Full refresh failed"),
            }
        }
        refreshed
    }

    /// Current context without triggering any refresh
    pub fn snapshot(&self, symbol: &str) -> Option<Arc<AnalyticalContext>> {
        self.contexts
            .get(&normalize(symbol))
            .map(|entry| entry.value().load())
    }

    /// Known symbols, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .contexts
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        symbols.sort();
        symbols
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.contexts.contains_key(&normalize(symbol))
    }

    pub fn evict(&self, symbol: &str) -> bool {
        let removed = self.contexts.remove(&normalize(symbol)).is_some();
        if removed {
            info!(symbol, "Evicted analytical context");
        }
        removed
    }

    pub fn clear_all(&self) -> usize {
        let count = self.contexts.len();
        self.contexts.clear();
        info!("Cleared {} analytical contexts", count);
        count
    }

    /// Operator reset of a context's update and error counters
    pub fn reset_counters(&self, symbol: &str) -> Result<()> {
        let symbol = normalize(symbol);
        let slot = self
            .contexts
            .get(&symbol)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ContextError::UnknownSymbol(symbol.clone()))?;
        slot.commit(|ctx| {
            ctx.update_count = 0;
            ctx.error_count = 0;
            ctx.last_error = None;
        });
        info!(symbol = %symbol, "Reset context counters");
        Ok(())
    }

    pub fn stats(&self) -> CoordinatorStats {
        let mut tiers = BTreeMap::new();
        let mut refreshes = 0;
        let mut failures = 0;
        for tier in Tier::ALL {
            let counters = &self.counters.tiers[tier.index()];
            let successes = counters.successes.load(Ordering::Relaxed);
            let failed = counters.failures.load(Ordering::Relaxed);
            let total_us = counters.total_refresh_us.load(Ordering::Relaxed);
            let attempts = successes + failed;
            refreshes += successes;
            failures += failed;
            tiers.insert(
                tier,
                TierRefreshStats {
                    successes,
                    failures: failed,
                    avg_refresh_ms: if attempts > 0 {
                        total_us as f64 / attempts as f64 / 1_000.0
                    } else {
                        0.0
                    },
                },
            );
        }

        let fully_initialized = self
            .contexts
            .iter()
            .filter(|entry| entry.value().load().is_fully_initialized())
            .count();

        CoordinatorStats {
            contexts: self.contexts.len(),
            fully_initialized,
            contexts_created: self.counters.contexts_created.load(Ordering::Relaxed),
            refreshes,
            refresh_failures: failures,
            coalesced_refreshes: self.counters.coalesced_refreshes.load(Ordering::Relaxed),
            analyzer_calls: self.counters.analyzer_calls.load(Ordering::Relaxed),
            repository_reads: self.counters.repository_reads.load(Ordering::Relaxed),
            success_rate: success_rate(refreshes, failures),
            tiers,
        }
    }

    /// Healthy while more than 80% of tier refreshes succeed
    pub fn health(&self) -> CoordinatorHealth {
        let stats = self.stats();
        let contexts_with_errors = self
            .contexts
            .iter()
            .filter(|entry| entry.value().load().error_count > 0)
            .count();
        CoordinatorHealth {
            healthy: stats.success_rate > HEALTHY_SUCCESS_RATE,
            success_rate: stats.success_rate,
            contexts: stats.contexts,
            contexts_with_errors,
        }
    }

    fn slot_for(&self, symbol: &str) -> Arc<ContextSlot> {
        if let Some(slot) = self.contexts.get(symbol) {
            return slot.value().clone();
        }
        let now = self.clock.now();
        self.contexts
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(ContextSlot::new(symbol, now)))
            .value()
            .clone()
    }

    /// Refresh `tiers` in dependency order. Failures are recorded and do not
    /// stop later tiers.
    async fn refresh_tiers(
        &self,
        symbol: &str,
        slot: &ContextSlot,
        tiers: &[Tier],
        force: bool,
    ) -> Vec<ContextError> {
        let mut errors = Vec::new();
        for tier in Tier::ALL.iter().filter(|tier| tiers.contains(tier)) {
            if let Err(e) = self.run_tier(symbol, slot, *tier, force).await {
                errors.push(e);
            }
        }
        if !errors.is_empty() {
            warn!(
                symbol,
                failed = errors.len(),
                requested = tiers.len(),
                "Partial context refresh"
            );
        }
        errors
    }

    async fn run_tier(
        &self,
        symbol: &str,
        slot: &ContextSlot,
        tier: Tier,
        force: bool,
    ) -> Result<()> {
        let flight = slot.flight(tier);
        let seen = flight.attempts.load(Ordering::Acquire);
        let mut last_outcome = flight.last_outcome.lock().await;

        if flight.attempts.load(Ordering::Acquire) != seen {
            self.counters
                .coalesced_refreshes
                .fetch_add(1, Ordering::Relaxed);
            debug!(symbol, %tier, "Joined in-flight refresh");
            return last_outcome.clone().unwrap_or(Ok(()));
        }

        if !force && self.policy.is_valid(tier, slot.load().refreshed_at(tier), self.clock.now()) {
            return Ok(());
        }

        let started = Instant::now();
        let outcome = match tier {
            Tier::Candles => self.refresh_candles(symbol, slot).await,
            Tier::Levels => self.refresh_levels(symbol, slot).await,
            Tier::Volatility => self.refresh_volatility(symbol, slot).await,
            Tier::MarketCondition => self.refresh_market_condition(symbol, slot).await,
        };
        self.record_outcome(symbol, slot, tier, &outcome, started.elapsed());

        *last_outcome = Some(outcome.clone());
        flight.attempts.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    fn record_outcome(
        &self,
        symbol: &str,
        slot: &ContextSlot,
        tier: Tier,
        outcome: &Result<()>,
        elapsed: Duration,
    ) {
        let counters = &self.counters.tiers[tier.index()];
        counters
            .total_refresh_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        match outcome {
            Ok(()) => {
                counters.successes.fetch_add(1, Ordering::Relaxed);
                debug!(symbol, %tier, elapsed_ms = elapsed.as_millis() as u64, "Tier refreshed");
            }
            Err(e) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                let message = e.to_string();
                slot.commit(|ctx| {
                    ctx.error_count += 1;
                    ctx.last_error = Some(message);
                });
                warn!(symbol, %tier, error = %e, "Tier refresh failed");
            }
        }
    }

    async fn refresh_candles(&self, symbol: &str, slot: &ContextSlot) -> Result<()> {
        let fetches = self.settings.candle_windows.iter().map(|spec| async move {
            let bars = self
                .fetch_window(symbol, spec.timeframe, spec.limit, Tier::Candles)
                .await;
            (spec.timeframe, bars)
        });

        // a failed timeframe is stored empty; the tier fails only when nothing loaded
        let mut windows = CandleWindows::new();
        let mut first_error = None;
        for (timeframe, bars) in join_all(fetches).await {
            match bars {
                Ok(bars) => {
                    windows.insert(timeframe, bars);
                }
                Err(e) => {
                    warn!(symbol, %timeframe, error = %e, "Candle window read failed, keeping it empty");
                    windows.insert(timeframe, Vec::new());
                    first_error.get_or_insert(e);
                }
            }
        }

        if windows.values().all(Vec::is_empty) {
            if let Some(e) = first_error {
                return Err(e);
            }
            return Err(ContextError::NoData {
                symbol: symbol.to_string(),
                timeframe: self
                    .settings
                    .candle_windows
                    .first()
                    .map(|spec| spec.timeframe)
                    .unwrap_or(Timeframe::M1),
            });
        }

        let now = self.clock.now();
        slot.commit(|ctx| {
            ctx.candles = Some(Arc::new(TierSnapshot::new(windows, now)));
            ctx.update_count += 1;
        });
        Ok(())
    }

    async fn refresh_levels(&self, symbol: &str, slot: &ContextSlot) -> Result<()> {
        let daily = self
            .fetch_window(
                symbol,
                Timeframe::D1,
                self.settings.level_lookback_days,
                Tier::Levels,
            )
            .await?;
        if daily.is_empty() {
            return Err(ContextError::NoData {
                symbol: symbol.to_string(),
                timeframe: Timeframe::D1,
            });
        }

        self.counters.analyzer_calls.fetch_add(1, Ordering::Relaxed);
        let mut levels = self
            .call_analyzer(symbol, Tier::Levels, self.analyzers.compute_levels(symbol, &daily))
            .await?;
        levels.sort_by(|a, b| a.price.cmp(&b.price));

        let now = self.clock.now();
        slot.commit(|ctx| {
            ctx.levels = Some(Arc::new(TierSnapshot::new(levels, now)));
            ctx.update_count += 1;
        });
        Ok(())
    }

    async fn refresh_volatility(&self, symbol: &str, slot: &ContextSlot) -> Result<()> {
        // levels as last committed; a level refresh in flight is not observed
        let current = slot.load();
        let daily = self
            .fetch_window(
                symbol,
                Timeframe::D1,
                self.settings.volatility_lookback_days + 1,
                Tier::Volatility,
            )
            .await?;

        let price = current
            .current_price()
            .or_else(|| daily.last().map(|bar| bar.close))
            .ok_or_else(|| ContextError::NoData {
                symbol: symbol.to_string(),
                timeframe: Timeframe::D1,
            })?;

        self.counters.analyzer_calls.fetch_add(1, Ordering::Relaxed);
        let data = self
            .call_analyzer(
                symbol,
                Tier::Volatility,
                self.analyzers.compute_volatility(
                    symbol,
                    &daily,
                    current.levels(),
                    price,
                    self.settings.exhaustion_threshold,
                ),
            )
            .await?;

        let now = self.clock.now();
        slot.commit(|ctx| {
            ctx.volatility = Some(Arc::new(TierSnapshot::new(data, now)));
            ctx.update_count += 1;
        });
        Ok(())
    }

    async fn refresh_market_condition(&self, symbol: &str, slot: &ContextSlot) -> Result<()> {
        let current = slot.load();
        let candles = current
            .candles
            .clone()
            .ok_or_else(|| ContextError::MissingDependency {
                symbol: symbol.to_string(),
                tier: Tier::MarketCondition,
                missing: Tier::Candles,
            })?;
        let windows = &candles.data;
        let levels = current.levels();

        self.counters.analyzer_calls.fetch_add(3, Ordering::Relaxed);
        let (patterns, breakout, assessment) = tokio::join!(
            self.call_analyzer(
                symbol,
                Tier::MarketCondition,
                self.analyzers.detect_patterns(symbol, windows),
            ),
            self.call_analyzer(
                symbol,
                Tier::MarketCondition,
                self.analyzers.detect_breakout(symbol, windows, levels),
            ),
            self.call_analyzer(
                symbol,
                Tier::MarketCondition,
                self.analyzers.assess_market_condition(
                    symbol,
                    windows,
                    levels,
                    current.volatility_data(),
                ),
            ),
        );
        let data = MarketConditionData::from_parts(assessment?, patterns?, breakout?);

        let now = self.clock.now();
        slot.commit(|ctx| {
            ctx.market_condition = Some(Arc::new(TierSnapshot::new(data, now)));
            ctx.update_count += 1;
        });
        Ok(())
    }

    async fn fetch_window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        tier: Tier,
    ) -> Result<Vec<Candle>> {
        let start = self.clock.now() - timeframe.lookback(limit);
        self.counters.repository_reads.fetch_add(1, Ordering::Relaxed);
        with_deadline(
            symbol,
            tier,
            Duration::from_millis(self.settings.repository_timeout_ms),
            self.repository.get_candles(symbol, timeframe, start, limit),
        )
        .await
    }

    async fn call_analyzer<T, F>(&self, symbol: &str, tier: Tier, call: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        with_deadline(
            symbol,
            tier,
            Duration::from_millis(self.settings.analyzer_timeout_ms),
            call,
        )
        .await
    }
}

async fn with_deadline<T, F>(symbol: &str, tier: Tier, timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ContextError::TierRefreshFailed {
            symbol: symbol.to_string(),
            tier,
            reason: format!("{:#}", e),
        }),
        Err(_) => Err(ContextError::Timeout {
            symbol: symbol.to_string(),
            tier,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

fn success_rate(successes: u64, failures: u64) -> f64 {
    let attempts = successes + failures;
    if attempts == 0 {
        1.0
    } else {
        successes as f64 / attempts as f64
    }
}
