//! Testing utilities for strategies

use crate::{SignalSink, Strategy};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use state_context::AnalyticalContext;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use types::{CandleWindows, Signal, SignalType};

/// Mock strategy with scripted behaviour
#[derive(Debug)]
pub struct MockStrategy {
    name: String,
    emit_signal: bool,
    delay: Duration,
    failing_symbols: HashSet<String>,
    calls: AtomicU64,
    seen: Mutex<Vec<String>>,
}

impl MockStrategy {
    /// A strategy that analyzes successfully and never signals
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            emit_signal: false,
            delay: Duration::ZERO,
            failing_symbols: HashSet::new(),
            calls: AtomicU64::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Emit a buy signal at the last close on every successful call
    pub fn with_signal(mut self) -> Self {
        self.emit_signal = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Return an error whenever `symbol` is analyzed
    pub fn failing_for(mut self, symbol: &str) -> Self {
        self.failing_symbols.insert(symbol.to_uppercase());
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Symbols analyzed, in call order
    pub fn seen_symbols(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    pub fn calls_for(&self, symbol: &str) -> usize {
        self.seen.lock().iter().filter(|s| s.as_str() == symbol).count()
    }
}

#[async_trait]
impl Strategy for MockStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(
        &self,
        symbol: &str,
        windows: &CandleWindows,
        context: &AnalyticalContext,
    ) -> Result<Option<Signal>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(symbol.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing_symbols.contains(symbol) {
            return Err(anyhow!("{} failed on {}", self.name, symbol));
        }
        if !self.emit_signal {
            return Ok(None);
        }

        let last = windows
            .values()
            .find_map(|bars| bars.last())
            .ok_or_else(|| anyhow!("no candles for {}", symbol))?;
        let price = context.current_price().unwrap_or(last.close);
        Ok(Some(
            Signal::new(symbol, &self.name, SignalType::Buy, price, 0.8, last.close_time())
                .with_reason("mock signal"),
        ))
    }
}

/// Sink that keeps every submitted signal
#[derive(Debug, Default)]
pub struct RecordingSink {
    signals: Mutex<Vec<Signal>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every submit fails
    pub fn failing() -> Self {
        Self {
            signals: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SignalSink for RecordingSink {
    async fn submit(&self, signal: Signal) -> Result<()> {
        if self.fail {
            return Err(anyhow!("sink rejected {} signal", signal.symbol));
        }
        self.signals.lock().push(signal);
        Ok(())
    }
}
