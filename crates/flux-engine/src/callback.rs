//! Real-time audio callback: drives the graph once per device period,
//! slicing it into `max_frames` sub-blocks and retuning the job pool's idle
//! sleep from measured utilization (spec §4.F).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flux_core::limits::TRACK_MAX;
use flux_graph::Graph;
use flux_jobpool::JobPool;
use flux_state::SharedState;

use crate::load::EngineLoad;

/// State for the real-time audio callback. Uses `UnsafeCell` for the graph:
/// only the audio thread ever calls `process`, and a buffer-size change
/// replaces it from the UI thread only while the device stream is stopped
/// (spec §4.F "Buffer-size change").
pub(crate) struct CallbackState {
    pub(crate) shared: Arc<SharedState>,
    job_pool: Arc<JobPool>,
    graph: UnsafeCell<Graph>,
    steady_time: AtomicI64,
    max_frames: AtomicUsize,
    sample_rate: f64,
    min_sleep: Duration,
    max_sleep: Duration,
    pub(crate) load: EngineLoad,
}

unsafe impl Send for CallbackState {}
unsafe impl Sync for CallbackState {}

impl CallbackState {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        job_pool: Arc<JobPool>,
        graph: Graph,
        sample_rate: f64,
        max_frames: usize,
        min_sleep: Duration,
        max_sleep: Duration,
    ) -> Self {
        Self {
            shared,
            job_pool,
            graph: UnsafeCell::new(graph),
            steady_time: AtomicI64::new(0),
            max_frames: AtomicUsize::new(max_frames),
            sample_rate,
            min_sleep,
            max_sleep,
            load: EngineLoad::default(),
        }
    }

    pub(crate) fn max_frames(&self) -> usize {
        self.max_frames.load(Ordering::Relaxed)
    }

    pub(crate) fn set_max_frames(&self, frames: usize) {
        self.max_frames.store(frames, Ordering::Relaxed);
    }

    /// Replace the graph. UI thread only, and only while the device is
    /// stopped: there is no concurrent audio-thread access to race against.
    pub(crate) fn replace_graph(&self, graph: Graph) {
        unsafe { *self.graph.get() = graph };
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn graph_mut(&self) -> &mut Graph {
        &mut *self.graph.get()
    }
}

/// Zero `output`, slice it into `max_frames` sub-blocks, run the graph over
/// each, and retune the job pool from the measured utilization (spec §4.F
/// callback algorithm). `output` is interleaved at `channels` channels;
/// channels beyond stereo are left at zero.
pub(crate) fn process_audio(state: &CallbackState, output: &mut [f32], channels: usize) {
    output.fill(0.0);
    let frames_total = output.len() / channels.max(1);
    if frames_total == 0 {
        return;
    }

    state.shared.processing_start();

    // Read the snapshot first: the per-track start_processing requests below
    // need the same plugin references the graph processes this block with.
    let snapshot = state.shared.read_snapshot();

    for track in 0..TRACK_MAX {
        let plugin = snapshot.track_plugins[track].clone();
        state.shared.apply_requests(track, || {
            if let Some(plugin) = plugin {
                if let Err(err) = plugin.lock().start_processing() {
                    tracing::warn!(track, %err, "start_processing failed");
                }
            }
        });
    }

    let max_frames = state.max_frames();
    let start = Instant::now();

    // SAFETY: only this function touches the graph from the audio thread;
    // `replace_graph` is only called by the UI thread while the device is
    // stopped (spec §4.F).
    let graph = unsafe { state.graph_mut() };

    let mut offset = 0usize;
    let mut remaining = frames_total;
    while remaining > 0 {
        let chunk = remaining.min(max_frames);
        let steady_time = state.steady_time.fetch_add(chunk as i64, Ordering::Relaxed);
        let (l, r) = graph.process(&snapshot, state.sample_rate, chunk, steady_time, &state.job_pool);
        write_interleaved(output, offset, channels, l, r);
        offset += chunk;
        remaining -= chunk;
    }

    let elapsed = start.elapsed();
    let budget = Duration::from_secs_f64(frames_total as f64 / state.sample_rate);
    let usage = elapsed.as_secs_f64() / budget.as_secs_f64().max(f64::EPSILON);
    state.load.record(usage, elapsed > budget);
    state.job_pool.retune(usage, snapshot.transport.playing, budget, state.min_sleep, state.max_sleep);

    state.shared.processing_end();
}

#[inline]
fn write_interleaved(output: &mut [f32], offset: usize, channels: usize, l: &[f32], r: &[f32]) {
    for i in 0..l.len() {
        let base = (offset + i) * channels;
        output[base] = l[i];
        if channels > 1 {
            output[base + 1] = r[i];
        }
    }
}
