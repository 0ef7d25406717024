use std::path::PathBuf;

use crate::limits::{MAX_HORIZON_DAYS, MAX_SESSION_MINUTES};

/// Settings the engine itself consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Days of bookable slots offered, starting today.
    pub horizon_days: u32,
    /// Session length when a booking names none.
    pub default_session_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon_days: 14,
            default_session_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub engine: EngineConfig,
}

impl Config {
    /// Reads the `TUTORSCHED_*` environment variables. Unparseable values
    /// fall back to their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let defaults = EngineConfig::default();

        let horizon_days = parsed("TUTORSCHED_HORIZON_DAYS")
            .map(|d| d.clamp(1, MAX_HORIZON_DAYS as u64) as u32)
            .unwrap_or(defaults.horizon_days);
        let default_session_minutes = parsed("TUTORSCHED_DEFAULT_SESSION_MINUTES")
            .map(|m| m.clamp(1, MAX_SESSION_MINUTES as u64) as u32)
            .unwrap_or(defaults.default_session_minutes);

        Self {
            data_dir: lookup("TUTORSCHED_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            metrics_port: lookup("TUTORSCHED_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            compact_threshold: parsed("TUTORSCHED_COMPACT_THRESHOLD").unwrap_or(1000),
            engine: EngineConfig {
                horizon_days,
                default_session_minutes,
            },
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("schedule.journal")
    }
}
