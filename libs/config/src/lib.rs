//! # Analysis Engine Configuration
//!
//! Centralized configuration for the context cache, the background refresh
//! loops and the clock-synchronized analysis scheduler.
//!
//! ## Features
//!
//! - **Defaults**: Production values grouped per component in [`defaults`]
//! - **TOML Loading**: [`EngineConfig::load`] reads a single file with one
//!   section per component; a missing file yields the defaults
//! - **Environment Overrides**: `ANALYSIS_*` variables override selected keys
//! - **Validation**: [`EngineConfig::validate`] rejects values the engine
//!   cannot run with
//!
//! ## Usage
//!
//! ```rust,no_run
//! use config::{resolve_config_path, EngineConfig};
//!
//! let path = resolve_config_path("ANALYSIS_ENGINE_CONFIG", "configs/analysis_engine.toml");
//! let config = EngineConfig::load(Some(&path)).unwrap();
//! assert!(config.scheduler.interval_secs > 0);
//! ```

pub mod defaults;
pub mod engine_config;

pub use engine_config::{
    load_config_file, resolve_config_path, CacheSettings, CandleWindowSpec, EngineConfig,
    LoggingSettings, RefreshSettings, RepositorySettings, SchedulerSettings,
    TimeframeRequirement,
};
