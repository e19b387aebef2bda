//! Engine configuration (spec §4.F).

use flux_core::{Error, Result};

/// Configuration for the audio engine: device sample rate expectations,
/// block slicing, job-pool sizing, and the adaptive sleep bounds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Device output device index; `None` selects the host default.
    pub device_index: Option<usize>,
    /// Upper bound on the sub-block size handed to the graph per call to
    /// `Graph::process` (spec §4.F "slice oversized device callbacks").
    pub max_frames: usize,
    pub num_workers: usize,
    pub min_sleep_ns: u64,
    pub max_sleep_ns: u64,
    pub parallel_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            max_frames: 512,
            num_workers: 4,
            min_sleep_ns: 10_000,
            max_sleep_ns: 2_000_000,
            parallel_threshold: flux_graph::DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_frames == 0 || self.max_frames > 65_536 {
            return Err(Error::InvalidConfig(format!("max_frames {} out of range (1-65536)", self.max_frames)));
        }
        if self.num_workers == 0 {
            return Err(Error::InvalidConfig("num_workers must be at least 1".into()));
        }
        if self.min_sleep_ns > self.max_sleep_ns {
            return Err(Error::InvalidConfig(format!(
                "min_sleep_ns {} exceeds max_sleep_ns {}",
                self.min_sleep_ns, self.max_sleep_ns
            )));
        }
        Ok(())
    }
}
