//! Default configuration values
//!
//! Constants used when a key is absent from the configuration file.

/// Context cache defaults
pub mod cache {
    /// Candle tier time-to-live (seconds)
    pub const CANDLES_TTL_SECS: u64 = 60;

    /// Volatility tier time-to-live (seconds)
    pub const VOLATILITY_TTL_SECS: u64 = 3_600;

    /// Market-condition tier recompute cadence (seconds)
    pub const CONDITION_TTL_SECS: u64 = 900;

    /// Fraction of the average daily range after which the move is exhausted
    pub const EXHAUSTION_THRESHOLD: f64 = 0.75;

    /// Per-call analyzer timeout (milliseconds)
    pub const ANALYZER_TIMEOUT_MS: u64 = 5_000;

    /// Per-call repository timeout (milliseconds)
    pub const REPOSITORY_TIMEOUT_MS: u64 = 5_000;

    /// Daily bars fed to the level analyzer (6 months)
    pub const LEVEL_LOOKBACK_DAYS: usize = 180;

    /// Completed daily bars averaged for the volatility range
    pub const VOLATILITY_LOOKBACK_DAYS: usize = 5;
}

/// Background refresh loop defaults
pub mod refresh {
    pub const CANDLE_INTERVAL_SECS: u64 = 60;
    pub const VOLATILITY_INTERVAL_SECS: u64 = 3_600;
    pub const CONDITION_INTERVAL_SECS: u64 = 900;

    /// Delay before a crashed loop is restarted (seconds)
    pub const RESTART_BACKOFF_SECS: u64 = 5;
}

/// Analysis scheduler defaults
pub mod scheduler {
    /// Seconds between cycle starts
    pub const INTERVAL_SECS: u64 = 60;

    /// Wall-clock second each cycle is aligned to
    pub const START_SECOND_OFFSET: u32 = 40;

    /// Strategy invocations allowed in flight across a whole cycle
    pub const MAX_CONCURRENT_ANALYSES: usize = 5;

    pub const REPOSITORY_TIMEOUT_MS: u64 = 5_000;
    pub const STRATEGY_TIMEOUT_MS: u64 = 10_000;

    /// Sleep after a cycle error before resuming (seconds)
    pub const ERROR_COOLDOWN_SECS: u64 = 60;

    /// Lifetime error count at which the scheduler reports unhealthy
    pub const ERROR_CEILING: u64 = 100;

    /// Completed cycles kept in the rolling history
    pub const HISTORY_CAPACITY: usize = 100;

    /// Consecutive sufficiency failures that flag a persistent data gap
    pub const SUFFICIENCY_ALERT_THRESHOLD: u32 = 3;
}
