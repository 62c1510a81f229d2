//! # Analytical Context Cache - Tiered Per-Symbol Market Structure
//!
//! ## Purpose
//!
//! Keeps a per-symbol analytical snapshot fresh and cheap to read while many
//! concurrent readers (the analysis scheduler) and four background refresh
//! loops touch it at the same time. Each symbol's context holds independently
//! aged tiers - candle windows, support/resistance levels, daily-range
//! volatility and a derived market condition - and each tier is refreshed
//! only when it is stale, at most once at a time per symbol.
//!
//! ## Integration Points
//!
//! - **Input Sources**: [`Repository`] candle reads, [`AnalyzerSet`] tier computations
//! - **Output Destinations**: Strategies read `Arc<AnalyticalContext>` snapshots
//! - **Background Work**: [`BackgroundRefresher`] runs supervised per-tier loops
//! - **Time**: Every freshness decision reads a `types::Clock`, so tests drive
//!   TTL expiry and midnight anchoring with `ManualClock`
//!
//! ## Architecture Role
//!
//! ```text
//! Repository ──candles──→ [ContextCoordinator] ←──refresh_tier── [BackgroundRefresher]
//!                               │    ↑                              candles   60s
//! AnalyzerSet ──tiers───────────┘    │                              volatility 1h
//!                                    │                              levels  00:00 UTC
//!          get_context(symbol) ──────┘                              condition 15m
//!                 │
//!                 ↓
//!        Arc<AnalyticalContext> ──→ Strategies
//!
//! Refresh order per symbol: candles → levels → volatility → market condition
//! ```
//!
//! ## Concurrency Guarantees
//!
//! - Concurrent first reads of a symbol create exactly one context
//! - Concurrent refreshes of the same (symbol, tier) collapse into one
//!   analyzer call whose outcome every waiter shares
//! - A tier's payload and its refresh timestamp are committed together
//! - A failed refresh leaves the previous tier data and timestamp in place

pub mod analyzers;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod freshness;
pub mod refresh;
pub mod repository;
pub mod testing;
pub mod traits;

pub use analyzers::{AnalyzerParams, DefaultAnalyzers};
pub use context::{
    AnalyticalContext, ContextSummary, MarketAssessment, MarketCondition, MarketConditionData,
    PatternFlags, Tier, TierSnapshot, TierStatus, TrendDirection, VolatilityData,
    VolatilityLevel,
};
pub use coordinator::{ContextCoordinator, CoordinatorHealth, CoordinatorStats, TierRefreshStats};
pub use error::{ContextError, Result};
pub use freshness::FreshnessPolicy;
pub use refresh::{
    loop_delay, BackgroundRefresher, LoopStats, PassReport, RefreshLoop, RefresherHealth,
    RefresherStats,
};
pub use repository::InMemoryRepository;
pub use traits::{AnalyzerSet, Repository};
