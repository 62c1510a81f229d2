//! # Analysis Engine Types
//!
//! Shared domain types used by every crate in the analysis engine workspace.
//!
//! ## Contents
//!
//! - **Market data**: [`Candle`] bars keyed by [`Timeframe`], oldest-first windows
//! - **Price structure**: [`Level`] support/resistance levels with validated strength
//! - **Output**: [`Signal`] produced by strategies and handed to a signal sink
//! - **Time**: [`Clock`] abstraction with [`SystemClock`] for production and
//!   [`ManualClock`] for deterministic tests, plus UTC calendar helpers
//!
//! ## Integration Points
//!
//! ```text
//! Repository ──Candle──→ [Cache Coordinator] ──Level/Candle──→ [Strategies] ──Signal──→ Sink
//!                               ↑                                   ↑
//!                             Clock ────────────────────────────── Clock
//! ```
//!
//! Prices are `rust_decimal::Decimal` end to end; derived ratios (strength,
//! percent of price) are plain `f64`.

pub mod candle;
pub mod clock;
pub mod errors;
pub mod level;
pub mod signal;
pub mod timeframe;

pub use candle::{Candle, CandleWindows};
pub use clock::{
    delay_until_second_offset, next_utc_midnight, Clock, ManualClock, SharedClock, SystemClock,
};
pub use errors::ValidationError;
pub use level::{Level, LevelKind};
pub use signal::{Signal, SignalType};
pub use timeframe::Timeframe;

pub use rust_decimal::Decimal;
