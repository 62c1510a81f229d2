//! Engine Configuration Module
//!
//! Loads the analysis engine configuration from a TOML file with one section
//! per component and applies `ANALYSIS_*` environment overrides on top.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use types::Timeframe;

use crate::defaults;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheSettings,
    pub refresh: RefreshSettings,
    pub scheduler: SchedulerSettings,
    pub repository: RepositorySettings,
    pub logging: LoggingSettings,
}

/// Bars kept in the cached candle tier for one timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleWindowSpec {
    pub timeframe: Timeframe,
    pub limit: usize,
}

/// Context cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub candles_ttl_secs: u64,
    pub volatility_ttl_secs: u64,
    pub condition_ttl_secs: u64,
    pub exhaustion_threshold: f64,
    pub analyzer_timeout_ms: u64,
    pub repository_timeout_ms: u64,
    pub level_lookback_days: usize,
    pub volatility_lookback_days: usize,
    pub candle_windows: Vec<CandleWindowSpec>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            candles_ttl_secs: defaults::cache::CANDLES_TTL_SECS,
            volatility_ttl_secs: defaults::cache::VOLATILITY_TTL_SECS,
            condition_ttl_secs: defaults::cache::CONDITION_TTL_SECS,
            exhaustion_threshold: defaults::cache::EXHAUSTION_THRESHOLD,
            analyzer_timeout_ms: defaults::cache::ANALYZER_TIMEOUT_MS,
            repository_timeout_ms: defaults::cache::REPOSITORY_TIMEOUT_MS,
            level_lookback_days: defaults::cache::LEVEL_LOOKBACK_DAYS,
            volatility_lookback_days: defaults::cache::VOLATILITY_LOOKBACK_DAYS,
            candle_windows: vec![
                CandleWindowSpec { timeframe: Timeframe::M5, limit: 100 },
                CandleWindowSpec { timeframe: Timeframe::M30, limit: 50 },
                CandleWindowSpec { timeframe: Timeframe::H1, limit: 24 },
                CandleWindowSpec { timeframe: Timeframe::H4, limit: 24 },
                CandleWindowSpec { timeframe: Timeframe::D1, limit: 180 },
            ],
        }
    }
}

/// Background refresh loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    pub enabled: bool,
    pub candle_interval_secs: u64,
    pub volatility_interval_secs: u64,
    pub condition_interval_secs: u64,
    pub restart_backoff_secs: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            candle_interval_secs: defaults::refresh::CANDLE_INTERVAL_SECS,
            volatility_interval_secs: defaults::refresh::VOLATILITY_INTERVAL_SECS,
            condition_interval_secs: defaults::refresh::CONDITION_INTERVAL_SECS,
            restart_backoff_secs: defaults::refresh::RESTART_BACKOFF_SECS,
        }
    }
}

/// Minimum data requirement for one timeframe in an analysis cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeframeRequirement {
    pub timeframe: Timeframe,
    /// Bars requested from the repository
    pub fetch_limit: usize,
    /// Bars required before strategies may run
    pub min_bars: usize,
    /// Critical timeframes abort the symbol when short
    #[serde(default)]
    pub critical: bool,
}

/// Analysis scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub symbols: Vec<String>,
    pub strategies: Vec<String>,
    pub interval_secs: u64,
    pub start_second_offset: u32,
    pub max_concurrent_analyses: usize,
    pub repository_timeout_ms: u64,
    pub strategy_timeout_ms: u64,
    pub error_cooldown_secs: u64,
    pub error_ceiling: u64,
    pub history_capacity: usize,
    pub sufficiency_alert_threshold: u32,
    pub timeframes: Vec<TimeframeRequirement>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            strategies: vec!["level_proximity".to_string()],
            interval_secs: defaults::scheduler::INTERVAL_SECS,
            start_second_offset: defaults::scheduler::START_SECOND_OFFSET,
            max_concurrent_analyses: defaults::scheduler::MAX_CONCURRENT_ANALYSES,
            repository_timeout_ms: defaults::scheduler::REPOSITORY_TIMEOUT_MS,
            strategy_timeout_ms: defaults::scheduler::STRATEGY_TIMEOUT_MS,
            error_cooldown_secs: defaults::scheduler::ERROR_COOLDOWN_SECS,
            error_ceiling: defaults::scheduler::ERROR_CEILING,
            history_capacity: defaults::scheduler::HISTORY_CAPACITY,
            sufficiency_alert_threshold: defaults::scheduler::SUFFICIENCY_ALERT_THRESHOLD,
            timeframes: vec![
                TimeframeRequirement {
                    timeframe: Timeframe::M1,
                    fetch_limit: 100,
                    min_bars: 10,
                    critical: true,
                },
                TimeframeRequirement {
                    timeframe: Timeframe::M5,
                    fetch_limit: 50,
                    min_bars: 20,
                    critical: false,
                },
                TimeframeRequirement {
                    timeframe: Timeframe::H1,
                    fetch_limit: 24,
                    min_bars: 12,
                    critical: true,
                },
                TimeframeRequirement {
                    timeframe: Timeframe::D1,
                    fetch_limit: 180,
                    min_bars: 20,
                    critical: true,
                },
            ],
        }
    }
}

/// Candle source settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySettings {
    /// JSON candle file replayed by the in-memory repository.
    /// `$VAR` references are expanded at load time.
    pub candles_path: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `path`, then apply environment overrides and
    /// validate. A missing file falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                info!("Loading engine config: {:?}", path);
                load_config_file::<EngineConfig>(path)?
            }
            Some(path) => {
                warn!("Config file not found: {:?}, using defaults", path);
                EngineConfig::default()
            }
            None => EngineConfig::default(),
        };

        config.apply_env_overrides_from(|key| std::env::var(key).ok())?;
        config.expand_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ANALYSIS_*` overrides read through `lookup`.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(symbols) = lookup("ANALYSIS_SYMBOLS") {
            let parsed: Vec<String> = symbols
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            debug!("ANALYSIS_SYMBOLS override: {:?}", parsed);
            self.scheduler.symbols = parsed;
        }

        if let Some(level) = lookup("ANALYSIS_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(interval) = lookup("ANALYSIS_INTERVAL_SECS") {
            self.scheduler.interval_secs = interval
                .trim()
                .parse()
                .with_context(|| format!("Invalid ANALYSIS_INTERVAL_SECS: {}", interval))?;
        }

        if let Some(offset) = lookup("ANALYSIS_START_SECOND") {
            self.scheduler.start_second_offset = offset
                .trim()
                .parse()
                .with_context(|| format!("Invalid ANALYSIS_START_SECOND: {}", offset))?;
        }

        Ok(())
    }

    /// Expand environment variables in path values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        if let Some(path) = &self.repository.candles_path {
            let expanded = shellexpand::env(path).context("Failed to expand candles path")?;
            self.repository.candles_path = Some(expanded.to_string());
        }
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let cache = &self.cache;
        if cache.candles_ttl_secs == 0
            || cache.volatility_ttl_secs == 0
            || cache.condition_ttl_secs == 0
        {
            bail!("cache TTLs must be greater than zero");
        }
        if !(cache.exhaustion_threshold > 0.0 && cache.exhaustion_threshold <= 1.0) {
            bail!(
                "exhaustion_threshold must be in (0, 1], got {}",
                cache.exhaustion_threshold
            );
        }
        if cache.volatility_lookback_days == 0 {
            bail!("volatility_lookback_days must be greater than zero");
        }
        if cache.candle_windows.is_empty() {
            bail!("cache.candle_windows must list at least one timeframe");
        }

        let refresh = &self.refresh;
        if refresh.candle_interval_secs == 0
            || refresh.volatility_interval_secs == 0
            || refresh.condition_interval_secs == 0
        {
            bail!("refresh intervals must be greater than zero");
        }

        let scheduler = &self.scheduler;
        if scheduler.interval_secs == 0 {
            bail!("scheduler.interval_secs must be greater than zero");
        }
        if scheduler.start_second_offset >= 60 {
            bail!(
                "scheduler.start_second_offset must be below 60, got {}",
                scheduler.start_second_offset
            );
        }
        if scheduler.max_concurrent_analyses == 0 {
            bail!("scheduler.max_concurrent_analyses must be greater than zero");
        }
        if scheduler.history_capacity == 0 {
            bail!("scheduler.history_capacity must be greater than zero");
        }
        if scheduler.timeframes.is_empty() {
            bail!("scheduler.timeframes must list at least one requirement");
        }
        for req in &scheduler.timeframes {
            if req.min_bars > req.fetch_limit {
                bail!(
                    "{} requires {} bars but only fetches {}",
                    req.timeframe,
                    req.min_bars,
                    req.fetch_limit
                );
            }
        }

        Ok(())
    }
}

/// Resolve the configuration path from `env_var`, falling back to `default`.
pub fn resolve_config_path(env_var: &str, default: &str) -> PathBuf {
    std::env::var(env_var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

/// Load and deserialize a TOML file
pub fn load_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    toml::from_str(&contents).with_context(|| format!("Failed to parse config file: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.start_second_offset, 40);
        assert_eq!(config.scheduler.history_capacity, 100);
        assert_eq!(config.cache.exhaustion_threshold, 0.75);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[scheduler]
symbols = ["SOLUSDT"]
interval_secs = 120

[[scheduler.timeframes]]
timeframe = "1h"
fetch_limit = 48
min_bars = 24
critical = true

[logging]
json = true
"#
        )
        .unwrap();

        let config: EngineConfig = load_config_file(file.path()).unwrap();
        assert_eq!(config.scheduler.symbols, vec!["SOLUSDT".to_string()]);
        assert_eq!(config.scheduler.interval_secs, 120);
        assert_eq!(config.scheduler.timeframes.len(), 1);
        assert_eq!(config.scheduler.timeframes[0].timeframe, Timeframe::H1);
        // untouched sections keep their defaults
        assert_eq!(config.scheduler.start_second_offset, 40);
        assert_eq!(config.cache, CacheSettings::default());
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let config = EngineConfig::load(Some(&missing)).unwrap();
        assert_eq!(config.refresh, RefreshSettings::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ANALYSIS_SYMBOLS", "btcusdt, ethusdt ,,solusdt"),
            ("ANALYSIS_INTERVAL_SECS", "300"),
            ("ANALYSIS_START_SECOND", "15"),
            ("ANALYSIS_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_env_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.scheduler.symbols, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        assert_eq!(config.scheduler.interval_secs, 300);
        assert_eq!(config.scheduler.start_second_offset, 15);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_bad_env_override_is_error() {
        let mut config = EngineConfig::default();
        let result = config.apply_env_overrides_from(|key| {
            (key == "ANALYSIS_INTERVAL_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.scheduler.start_second_offset = 60;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.cache.exhaustion_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.scheduler.max_concurrent_analyses = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.scheduler.timeframes.clear();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.scheduler.timeframes[0].min_bars = 500;
        assert!(config.validate().is_err());
    }
}
