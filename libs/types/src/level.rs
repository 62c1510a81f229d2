//! Support and resistance levels

use crate::errors::ValidationError;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Strength at or above which a level counts as strong
pub const STRONG_LEVEL_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    Support,
    Resistance,
}

/// A price level derived from daily structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub kind: LevelKind,
    /// Normalized strength in [0, 1]
    pub strength: f64,
    /// Number of bars that touched the level
    pub touches: u32,
    pub last_touch: Option<DateTime<Utc>>,
}

impl Level {
    pub fn new(
        price: Decimal,
        kind: LevelKind,
        strength: f64,
        touches: u32,
        last_touch: Option<DateTime<Utc>>,
    ) -> Result<Self, ValidationError> {
        if price <= Decimal::ZERO {
            return Err(ValidationError::InvalidPrice(price.to_string()));
        }
        if !(0.0..=1.0).contains(&strength) || strength.is_nan() {
            return Err(ValidationError::InvalidStrength(strength));
        }
        Ok(Self {
            price,
            kind,
            strength,
            touches,
            last_touch,
        })
    }

    pub fn is_strong(&self) -> bool {
        self.strength >= STRONG_LEVEL_THRESHOLD
    }

    /// Absolute distance to `price` as a percent of `price`.
    pub fn distance_percent(&self, price: Decimal) -> f64 {
        if price <= Decimal::ZERO {
            return f64::INFINITY;
        }
        ((self.price - price).abs() / price * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(f64::INFINITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validation() {
        assert!(Level::new(dec!(0), LevelKind::Support, 0.5, 1, None).is_err());
        assert!(Level::new(dec!(100), LevelKind::Support, 1.5, 1, None).is_err());
        assert!(Level::new(dec!(100), LevelKind::Support, f64::NAN, 1, None).is_err());
        let level = Level::new(dec!(100), LevelKind::Resistance, 0.7, 3, None).unwrap();
        assert!(level.is_strong());
    }

    #[test]
    fn test_distance_percent() {
        let level = Level::new(dec!(99), LevelKind::Support, 0.5, 1, None).unwrap();
        assert!((level.distance_percent(dec!(100)) - 1.0).abs() < 1e-9);
    }
}
