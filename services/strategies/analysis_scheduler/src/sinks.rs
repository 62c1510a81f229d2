//! Signal sinks
//!
//! [`LoggingSignalSink`] writes one structured line per signal.
//! [`ChannelSignalSink`] forwards signals into a bounded channel for a
//! downstream filter or notification stage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use strategy_shared::SignalSink;
use tokio::sync::mpsc;
use tracing::info;
use types::Signal;

#[derive(Debug, Default)]
pub struct LoggingSignalSink {
    submitted: AtomicU64,
}

impl LoggingSignalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SignalSink for LoggingSignalSink {
    async fn submit(&self, signal: Signal) -> Result<()> {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        info!(
            symbol = %signal.symbol,
            strategy = %signal.strategy,
            signal_type = ?signal.signal_type,
            price = %signal.price,
            strength = signal.strength,
            stop_loss = ?signal.stop_loss,
            take_profit = ?signal.take_profit,
            reason = %signal.reason,
            "📈 Signal generated"
        );
        Ok(())
    }
}

/// Forwards signals to a bounded `mpsc` channel; waits for capacity.
#[derive(Debug, Clone)]
pub struct ChannelSignalSink {
    tx: mpsc::Sender<Signal>,
}

impl ChannelSignalSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Signal>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl SignalSink for ChannelSignalSink {
    async fn submit(&self, signal: Signal) -> Result<()> {
        self.tx
            .send(signal)
            .await
            .context("signal channel closed")
    }
}
