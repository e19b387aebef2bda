//! Per-callback utilization telemetry (spec §4.F "store into shared state
//! for UI display"), plus an underrun counter for the same purpose.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Lock-free readout of the engine's last measured callback load. Written by
/// the audio thread once per callback, read by the UI thread for display.
#[derive(Default)]
pub struct EngineLoad {
    usage_permille: AtomicU32,
    underruns: AtomicU64,
    blocks_processed: AtomicU64,
}

impl EngineLoad {
    pub(crate) fn record(&self, usage: f64, over_budget: bool) {
        let permille = (usage * 1000.0).clamp(0.0, u32::MAX as f64) as u32;
        self.usage_permille.store(permille, Ordering::Relaxed);
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
        if over_budget {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fraction of the per-block time budget consumed by the last callback
    /// (1.0 == exactly at budget).
    pub fn usage(&self) -> f64 {
        self.usage_permille.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tracks_usage_and_underruns() {
        let load = EngineLoad::default();
        load.record(0.35, false);
        assert!((load.usage() - 0.35).abs() < 1e-3);
        assert_eq!(load.underruns(), 0);

        load.record(1.2, true);
        assert_eq!(load.underruns(), 1);
        assert_eq!(load.blocks_processed(), 2);
    }
}
