//! Cycle statistics, rolling history and per-strategy breakdown

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use strategy_shared::{MetricsCollector, StrategyMetrics};

/// Outcome of analyzing one symbol in one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolResult {
    pub symbol: String,
    pub success: bool,
    /// Skipped for a critical sufficiency shortfall
    pub insufficient: bool,
    pub signals: usize,
    pub strategies_run: usize,
    /// Strategies that errored or whose signal the sink rejected
    pub failed_strategies: Vec<String>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl SymbolResult {
    pub fn skipped(symbol: &str, error: String, insufficient: bool, elapsed: Duration, at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            success: false,
            insufficient,
            signals: 0,
            strategies_run: 0,
            failed_strategies: Vec::new(),
            elapsed_ms: elapsed.as_millis() as u64,
            error: Some(error),
            completed_at: at,
        }
    }
}

/// Summary of one completed cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleStats {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub symbols_total: usize,
    pub symbols_analyzed: usize,
    pub symbols_skipped: usize,
    pub signals: usize,
    pub errors: usize,
    /// Runtime instants bracketing the cycle's fan-out
    #[serde(skip)]
    pub started: tokio::time::Instant,
    #[serde(skip)]
    pub joined: tokio::time::Instant,
}

/// Operator-facing statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub symbols_analyzed: u64,
    pub signals_generated: u64,
    pub errors: u64,
    pub sufficiency_failures: u64,
    pub overruns: u64,
    pub avg_cycle_ms: f64,
    pub uptime_secs: u64,
    pub per_strategy: BTreeMap<String, StrategyMetrics>,
    pub last_results: BTreeMap<String, SymbolResult>,
    pub last_cycle: Option<CycleStats>,
}

/// Lock-free counters plus the bounded cycle history
pub struct StatsRecorder {
    started: Instant,
    cycles: AtomicU64,
    symbols_analyzed: AtomicU64,
    signals_generated: AtomicU64,
    errors: AtomicU64,
    sufficiency_failures: AtomicU64,
    overruns: AtomicU64,
    total_cycle_ms: AtomicU64,
    history_capacity: usize,
    history: Mutex<VecDeque<CycleStats>>,
    per_strategy: BTreeMap<String, MetricsCollector>,
    last_results: DashMap<String, SymbolResult>,
}

impl StatsRecorder {
    pub fn new<'a>(strategies: impl IntoIterator<Item = &'a str>, history_capacity: usize) -> Self {
        Self {
            started: Instant::now(),
            cycles: AtomicU64::new(0),
            symbols_analyzed: AtomicU64::new(0),
            signals_generated: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            sufficiency_failures: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            total_cycle_ms: AtomicU64::new(0),
            history_capacity: history_capacity.max(1),
            history: Mutex::new(VecDeque::with_capacity(history_capacity.max(1))),
            per_strategy: strategies
                .into_iter()
                .map(|name| (name.to_string(), MetricsCollector::new()))
                .collect(),
            last_results: DashMap::new(),
        }
    }

    pub fn strategy(&self, name: &str) -> Option<&MetricsCollector> {
        self.per_strategy.get(name)
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sufficiency_failure(&self) {
        self.sufficiency_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_symbol(&self, result: SymbolResult) {
        if result.success {
            self.symbols_analyzed.fetch_add(1, Ordering::Relaxed);
        }
        self.signals_generated
            .fetch_add(result.signals as u64, Ordering::Relaxed);
        self.last_results.insert(result.symbol.clone(), result);
    }

    pub fn record_cycle(&self, cycle: CycleStats) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.total_cycle_ms.fetch_add(cycle.elapsed_ms, Ordering::Relaxed);
        let mut history = self.history.lock();
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(cycle);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn last_cycle(&self) -> Option<CycleStats> {
        self.history.lock().back().cloned()
    }

    /// Oldest first
    pub fn history(&self) -> Vec<CycleStats> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn last_result(&self, symbol: &str) -> Option<SymbolResult> {
        self.last_results.get(symbol).map(|r| r.clone())
    }

    pub fn snapshot(&self) -> SchedulerStats {
        let cycles = self.cycles();
        SchedulerStats {
            cycles,
            symbols_analyzed: self.symbols_analyzed.load(Ordering::Relaxed),
            signals_generated: self.signals_generated.load(Ordering::Relaxed),
            errors: self.errors(),
            sufficiency_failures: self.sufficiency_failures.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            avg_cycle_ms: if cycles > 0 {
                self.total_cycle_ms.load(Ordering::Relaxed) as f64 / cycles as f64
            } else {
                0.0
            },
            uptime_secs: self.started.elapsed().as_secs(),
            per_strategy: self
                .per_strategy
                .iter()
                .map(|(name, metrics)| (name.clone(), metrics.get_metrics()))
                .collect(),
            last_results: self
                .last_results
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            last_cycle: self.last_cycle(),
        }
    }
}
