//! The audio engine (spec §4.F): owns the graph, shared state, job pool, and
//! device callback, and drives the buffer-size-change sequence.

mod callback;
mod config;
mod load;
mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use flux_core::limits::TRACK_MAX;
use flux_core::{Error, Result};
use flux_graph::{Graph, NodeKind, NodeSpec};
use flux_jobpool::JobPool;
use flux_plugin::PluginInstance;
use flux_state::{SharedState, StateSnapshot};

pub use config::EngineConfig;
pub use load::EngineLoad;

use callback::CallbackState;
use output::DeviceOutput;

/// A CLAP plugin path to load and bind to a track's synth node.
pub struct TrackPlugin {
    pub track: usize,
    pub path: PathBuf,
}

/// Running engine: device stream plus everything the callback touches.
/// Construction validates the graph and loads/activates plugins before the
/// device stream ever starts, so a failure here never leaves a half-started
/// stream behind.
pub struct Engine {
    config: EngineConfig,
    specs: Vec<NodeSpec>,
    /// The engine's own authoritative plugin references, track-indexed to
    /// match `StateSnapshot::track_plugins`. Every snapshot the engine writes
    /// carries a clone of this array, so plugin lifecycle (activate,
    /// start_processing, deactivate) and the snapshot the audio thread reads
    /// never disagree about which instrument is bound to which track.
    plugins: [Option<Arc<Mutex<PluginInstance>>>; TRACK_MAX],
    shared: Arc<SharedState>,
    job_pool: Arc<JobPool>,
    callback_state: Arc<CallbackState>,
    device: DeviceOutput,
}

impl Engine {
    /// Build the graph, load and activate any instrument plugins, and start
    /// the device stream.
    pub fn start(config: EngineConfig, specs: Vec<NodeSpec>, track_plugins: Vec<TrackPlugin>) -> Result<Self> {
        config.validate()?;

        let mut device = DeviceOutput::new(config.device_index)?;
        let sample_rate = device.sample_rate();

        let job_pool = Arc::new(JobPool::new(config.num_workers, config.min_sleep_ns));

        let mut has_synth = [false; TRACK_MAX];
        for spec in &specs {
            if let NodeKind::Synth { track } = spec.kind {
                if track < TRACK_MAX {
                    has_synth[track] = true;
                }
            }
        }

        let mut plugins: [Option<Arc<Mutex<PluginInstance>>>; TRACK_MAX] = std::array::from_fn(|_| None);
        for track_plugin in &track_plugins {
            if !has_synth.get(track_plugin.track).copied().unwrap_or(false) {
                return Err(Error::InvalidConfig(format!(
                    "track {} has no synth node to bind a plugin to",
                    track_plugin.track
                )));
            }
            let mut instance =
                PluginInstance::load(&track_plugin.path, Arc::clone(&job_pool), config.num_workers)?;
            instance.activate(sample_rate, config.max_frames as u32)?;
            plugins[track_plugin.track] = Some(Arc::new(Mutex::new(instance)));
        }

        let graph = Graph::prepare(specs.clone(), config.max_frames, config.parallel_threshold)?;

        let mut initial_snapshot = StateSnapshot::default();
        initial_snapshot.track_plugins = plugins.clone();
        let shared = Arc::new(SharedState::new(initial_snapshot));

        let callback_state = Arc::new(CallbackState::new(
            Arc::clone(&shared),
            Arc::clone(&job_pool),
            graph,
            sample_rate,
            config.max_frames,
            Duration::from_nanos(config.min_sleep_ns),
            Duration::from_nanos(config.max_sleep_ns),
        ));

        for track in 0..TRACK_MAX {
            if plugins[track].is_some() {
                shared.request_start_processing(track);
            }
        }

        device.start(Arc::clone(&callback_state))?;

        Ok(Self { config, specs, plugins, shared, job_pool, callback_state, device })
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Stamp this engine's track-to-plugin bindings onto `snapshot` before
    /// it's written. Callers that build a fresh snapshot each tick (rather
    /// than mutating one read back from `shared()`) must call this, or the
    /// audio thread loses its plugin references on the very next write.
    pub fn apply_track_plugins(&self, snapshot: &mut StateSnapshot) {
        snapshot.track_plugins = self.plugins.clone();
    }

    pub fn job_pool(&self) -> &Arc<JobPool> {
        &self.job_pool
    }

    pub fn load(&self) -> &EngineLoad {
        &self.callback_state.load
    }

    pub fn sample_rate(&self) -> f64 {
        self.device.sample_rate()
    }

    pub fn channels(&self) -> usize {
        self.device.channels()
    }

    pub fn max_frames(&self) -> usize {
        self.callback_state.max_frames()
    }

    pub fn is_running(&self) -> bool {
        self.device.is_running()
    }

    pub fn device_name(&self) -> Result<String> {
        self.device.device_name()
    }

    /// Graceful shutdown: stop the device, wait for the callback to drain,
    /// and deactivate every plugin, in that order (spec §6 supplements
    /// "graceful shutdown").
    pub fn shutdown(&mut self) {
        self.device.stop();
        self.shared.wait_for_idle();
        for plugin in self.plugins.iter().flatten() {
            let mut guard = plugin.lock();
            guard.stop_processing();
            guard.deactivate();
        }
    }

    /// Stop the device, drain every plugin's processing state, reactivate
    /// each at the new block size, rebuild the graph's scratch buffers, and
    /// restart the device (spec §4.F "Buffer-size change"). Every step is
    /// scope-bound (stream, plugin lock, graph) so a failure partway through
    /// unwinds cleanly, leaving no stream running with a stale graph.
    pub fn change_max_frames(&mut self, new_max_frames: usize) -> Result<()> {
        self.device.stop();
        self.shared.wait_for_idle();

        for plugin in self.plugins.iter().flatten() {
            let mut guard = plugin.lock();
            guard.stop_processing();
            guard.deactivate();
            guard.activate(self.device.sample_rate(), new_max_frames as u32)?;
        }

        let new_graph = Graph::prepare(self.specs.clone(), new_max_frames, self.config.parallel_threshold)?;
        self.callback_state.replace_graph(new_graph);
        self.callback_state.set_max_frames(new_max_frames);
        self.config.max_frames = new_max_frames;

        for track in 0..TRACK_MAX {
            if self.plugins[track].is_some() {
                self.shared.request_start_processing(track);
            }
        }

        self.device.start(Arc::clone(&self.callback_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_specs() -> Vec<NodeSpec> {
        vec![NodeSpec::master(vec![])]
    }

    #[test]
    fn engine_config_rejects_invalid_settings_before_device_access() {
        let mut config = EngineConfig::default();
        config.num_workers = 0;
        assert!(config.validate().is_err());
        let _ = minimal_specs();
    }
}
