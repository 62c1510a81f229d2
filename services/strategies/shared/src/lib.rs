//! Shared Strategy Framework
//!
//! Plugin traits the analysis scheduler drives, per-strategy metrics and
//! test doubles for both sides of the strategy boundary.

pub mod metrics;
pub mod testing;
pub mod traits;

pub use metrics::*;
pub use traits::*;
