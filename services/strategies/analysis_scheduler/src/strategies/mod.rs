//! Built-in strategies, resolved by configured name

pub mod level_proximity;

pub use level_proximity::{LevelProximityConfig, LevelProximityStrategy};

use crate::error::{Result, SchedulerError};
use std::sync::Arc;
use strategy_shared::Strategy;

/// Names accepted by [`build_strategies`]
pub const AVAILABLE: &[&str] = &[level_proximity::NAME];

/// Instantiate each named strategy; unknown names are a startup error.
pub fn build_strategies(names: &[String], exhaustion_threshold: f64) -> Result<Vec<Arc<dyn Strategy>>> {
    names
        .iter()
        .map(|name| match name.as_str() {
            level_proximity::NAME => Ok(Arc::new(LevelProximityStrategy::new(LevelProximityConfig {
                exhaustion_threshold,
                ..LevelProximityConfig::default()
            })) as Arc<dyn Strategy>),
            other => Err(SchedulerError::UnknownStrategy(other.to_string())),
        })
        .collect()
}
