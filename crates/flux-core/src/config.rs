//! Top-level configuration, folding the CLI's environment knobs (spec §6)
//! into validated values at startup.

use crate::{Error, Result};

/// Configuration read once at startup and shared by the engine and
/// transport. Environment knobs override the defaults; anything unset or
/// unparseable falls back silently.
#[derive(Debug, Clone)]
pub struct FluxConfig {
    pub tempo_bpm: f64,
    pub worker_min_sleep_ns: u64,
    pub worker_max_sleep_ns: u64,
    pub parallel_threshold: usize,
    /// UI scale factor; parsed for forward compatibility with a GUI
    /// frontend but unused by this headless core.
    pub ui_scale: f64,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            worker_min_sleep_ns: 10_000,
            worker_max_sleep_ns: 2_000_000,
            parallel_threshold: 3,
            ui_scale: 1.0,
        }
    }
}

impl FluxConfig {
    /// Fold `WORKER_MIN_SLEEP_NS`, `WORKER_MAX_SLEEP_NS`,
    /// `PARALLEL_THRESHOLD`, and `UI_SCALE` (spec §6) into the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tempo_bpm: defaults.tempo_bpm,
            worker_min_sleep_ns: env_parse("WORKER_MIN_SLEEP_NS").unwrap_or(defaults.worker_min_sleep_ns),
            worker_max_sleep_ns: env_parse("WORKER_MAX_SLEEP_NS").unwrap_or(defaults.worker_max_sleep_ns),
            parallel_threshold: env_parse("PARALLEL_THRESHOLD").unwrap_or(defaults.parallel_threshold),
            ui_scale: env_parse("UI_SCALE").unwrap_or(defaults.ui_scale),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tempo_bpm < 1.0 || self.tempo_bpm > 999.0 {
            return Err(Error::InvalidConfig(format!("tempo_bpm {} out of range (1-999)", self.tempo_bpm)));
        }
        if self.worker_min_sleep_ns > self.worker_max_sleep_ns {
            return Err(Error::InvalidConfig(format!(
                "worker_min_sleep_ns {} exceeds worker_max_sleep_ns {}",
                self.worker_min_sleep_ns, self.worker_max_sleep_ns
            )));
        }
        if self.parallel_threshold == 0 {
            return Err(Error::InvalidConfig("parallel_threshold must be at least 1".into()));
        }
        if self.ui_scale <= 0.0 {
            return Err(Error::InvalidConfig(format!("ui_scale {} must be positive", self.ui_scale)));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}
