//! Validation errors for domain types

use thiserror::Error;

/// Errors raised when constructing or parsing domain values
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid level price: {0}")]
    InvalidPrice(String),

    #[error("Level strength {0} outside [0, 1]")]
    InvalidStrength(f64),

    #[error("Unknown timeframe: '{0}'")]
    UnknownTimeframe(String),

    #[error("Invalid candle: {0}")]
    InvalidCandle(String),
}
