//! In-memory candle repository
//!
//! Holds candle series keyed by (symbol, timeframe) in a DashMap. Used by the
//! service binary to replay a JSON candle file and by tests as a seeded
//! data source.

use crate::traits::Repository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use types::{Candle, Timeframe};

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    series: DashMap<(String, Timeframe), Vec<Candle>>,
    reads: AtomicU64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of candles
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read candle file: {:?}", path))?;
        let repository = Self::from_json_str(&contents)
            .with_context(|| format!("Failed to parse candle file: {:?}", path))?;
        info!(
            "📂 Loaded {} candle series from {:?}",
            repository.series.len(),
            path
        );
        Ok(repository)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let candles: Vec<Candle> = serde_json::from_str(json)?;
        let repository = Self::new();
        repository.insert(candles);
        Ok(repository)
    }

    /// Merge bars into their series. A bar with an existing open time replaces
    /// the stored one.
    pub fn insert(&self, candles: impl IntoIterator<Item = Candle>) {
        for candle in candles {
            let key = (candle.symbol.to_uppercase(), candle.timeframe);
            let mut series = self.series.entry(key).or_default();
            match series.binary_search_by(|c| c.open_time.cmp(&candle.open_time)) {
                Ok(pos) => series[pos] = candle,
                Err(pos) => series.insert(pos, candle),
            }
        }
    }

    pub fn series_len(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.series
            .get(&(symbol.to_uppercase(), timeframe))
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let Some(series) = self.series.get(&(symbol.to_uppercase(), timeframe)) else {
            return Ok(Vec::new());
        };
        let from = series.partition_point(|c| c.open_time < start);
        let available = &series[from..];
        let skip = available.len().saturating_sub(limit);
        Ok(available[skip..].to_vec())
    }
}
