//! Trading signal produced by strategies

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    /// Name of the strategy that produced the signal
    pub strategy: String,
    pub signal_type: SignalType,
    /// Reference price at generation time
    pub price: Decimal,
    /// Confidence in [0, 1]
    pub strength: f64,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Human-readable reason for the signal
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        symbol: &str,
        strategy: &str,
        signal_type: SignalType,
        price: Decimal,
        strength: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            strategy: strategy.to_string(),
            signal_type,
            price,
            strength: strength.clamp(0.0, 1.0),
            stop_loss: None,
            take_profit: None,
            reason: String::new(),
            created_at,
        }
    }

    pub fn with_stop_loss(mut self, stop_loss: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: Decimal) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}
