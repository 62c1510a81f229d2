//! Strategy metrics collection

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe metrics collector for one strategy
#[derive(Debug)]
pub struct MetricsCollector {
    start_time: Instant,
    analyses: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    signals_generated: AtomicU64,
    total_analysis_us: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            analyses: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            signals_generated: AtomicU64::new(0),
            total_analysis_us: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_success(&self, elapsed: Duration, produced_signal: bool) {
        self.analyses.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.add_time(elapsed);
        if produced_signal {
            self.signals_generated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self, elapsed: Duration, error: impl Into<String>) {
        self.analyses.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.add_time(elapsed);
        *self.last_error.lock() = Some(error.into());
    }

    fn add_time(&self, elapsed: Duration) {
        self.total_analysis_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> super::StrategyMetrics {
        let analyses = self.analyses.load(Ordering::Relaxed);
        let total_us = self.total_analysis_us.load(Ordering::Relaxed);
        super::StrategyMetrics {
            analyses,
            successes: self.successes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            signals_generated: self.signals_generated.load(Ordering::Relaxed),
            avg_analysis_ms: if analyses > 0 {
                total_us as f64 / analyses as f64 / 1_000.0
            } else {
                0.0
            },
            last_error: self.last_error.lock().clone(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_error_accounting() {
        let metrics = MetricsCollector::new();
        metrics.record_success(Duration::from_millis(4), true);
        metrics.record_success(Duration::from_millis(2), false);
        metrics.record_error(Duration::from_millis(6), "boom");

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.analyses, 3);
        assert_eq!(snapshot.successes, 2);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.signals_generated, 1);
        assert!((snapshot.avg_analysis_ms - 4.0).abs() < 1e-9);
        assert_eq!(snapshot.last_error.as_deref(), Some("boom"));
        assert!((snapshot.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
