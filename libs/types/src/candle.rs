//! OHLCV bars

use crate::errors::ValidationError;
use crate::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Candle windows keyed by timeframe, each ordered oldest-first.
pub type CandleWindows = BTreeMap<Timeframe, Vec<Candle>>;

/// A single OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Bar open time (UTC)
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Build a bar, rejecting inverted or non-positive ranges.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Result<Self, ValidationError> {
        if low <= Decimal::ZERO {
            return Err(ValidationError::InvalidCandle(format!(
                "{} {} low {} must be positive",
                symbol, open_time, low
            )));
        }
        if high < low || open > high || open < low || close > high || close < low {
            return Err(ValidationError::InvalidCandle(format!(
                "{} {} OHLC out of range (o={} h={} l={} c={})",
                symbol, open_time, open, high, low, close
            )));
        }
        Ok(Self {
            symbol: symbol.to_uppercase(),
            timeframe,
            open_time,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    /// Close time (exclusive) of this bar
    pub fn close_time(&self) -> DateTime<Utc> {
        self.open_time + self.timeframe.duration()
    }

    /// High minus low
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}
