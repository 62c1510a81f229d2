//! # Analysis Scheduler Service
//!
//! Drives strategies once per minute over every configured symbol, reading
//! cached market structure from the context coordinator and fresh candles
//! from the repository, and hands generated signals to a sink.
//!
//! ## Integration Points
//!
//! - **Input Sources**: `state_context::ContextCoordinator` contexts, `Repository` candle windows
//! - **Output Destinations**: [`SignalSink`](strategy_shared::SignalSink) implementations in [`sinks`]
//! - **Monitoring**: [`AnalysisScheduler::stats`], [`AnalysisScheduler::health`] and
//!   [`AnalysisScheduler::subscribe_cycles`] are polled or subscribed by operators

pub mod error;
pub mod logging;
pub mod scheduler;
pub mod sinks;
pub mod stats;
pub mod status;
pub mod strategies;
pub mod sufficiency;

pub use error::{Result, SchedulerError};
pub use scheduler::{AnalysisScheduler, SchedulerHealth};
pub use sinks::{ChannelSignalSink, LoggingSignalSink};
pub use stats::{CycleStats, SchedulerStats, SymbolResult};
pub use status::SchedulerStatus;
pub use strategies::{build_strategies, LevelProximityStrategy};
pub use sufficiency::{check_sufficiency, Shortfall, SufficiencyReport, SufficiencyTracker};
