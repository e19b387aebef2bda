//! UI-thread/audio-thread rendezvous (spec §4.B): a mutex-guarded session
//! snapshot plus the atomic flags that let the audio thread signal
//! quiescence and per-plugin `start_processing` status back to the UI
//! thread without ever blocking on it.

mod snapshot;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use flux_core::limits::{FX_MAX, TRACK_MAX};

pub use snapshot::{StateSnapshot, TransportSnapshot};

/// The shared rendezvous point. One instance is created at startup and
/// handed to both the UI thread (writer) and the audio callback (reader).
pub struct SharedState {
    snapshot: Mutex<StateSnapshot>,

    /// Incremented before entering the audio callback's processing section
    /// and decremented after leaving it. Zero means the device is quiescent
    /// and plugin-lifecycle calls that require no concurrent `process` may
    /// proceed.
    processing_depth: AtomicI64,

    /// Set by the audio thread once `start_processing` has been called on a
    /// track's instrument; cleared by the UI thread via
    /// `request_clear_plugin_started` once it's safe to do so.
    plugin_started: [AtomicBool; TRACK_MAX],
    fx_started: [[AtomicBool; FX_MAX]; TRACK_MAX],

    /// UI → audio request flags, applied by the audio thread at the start of
    /// its next block so the ABI's "audio-thread-only" calls stay on the
    /// audio thread even though the *decision* to flip them was the UI's.
    request_start_processing: [AtomicBool; TRACK_MAX],
    request_clear_plugin_started: [AtomicBool; TRACK_MAX],
}

impl SharedState {
    pub fn new(initial: StateSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(initial),
            processing_depth: AtomicI64::new(0),
            plugin_started: std::array::from_fn(|_| AtomicBool::new(false)),
            fx_started: std::array::from_fn(|_| std::array::from_fn(|_| AtomicBool::new(false))),
            request_start_processing: std::array::from_fn(|_| AtomicBool::new(false)),
            request_clear_plugin_started: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    /// UI thread: replace the shared snapshot. The lock is held only for the
    /// copy (spec §4.B).
    pub fn write_snapshot(&self, state: StateSnapshot) {
        *self.snapshot.lock() = state;
    }

    /// Audio thread, hot path: clone the current snapshot. `StateSnapshot`
    /// keeps its heavy per-clip data behind `Arc`, so the clone under lock is
    /// cheap regardless of session size.
    pub fn read_snapshot(&self) -> StateSnapshot {
        self.snapshot.lock().clone()
    }

    /// Audio thread: mark the start of a processing block.
    pub fn processing_start(&self) {
        self.processing_depth.fetch_add(1, Ordering::AcqRel);
    }

    /// Audio thread: mark the end of a processing block.
    pub fn processing_end(&self) {
        self.processing_depth.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn is_processing(&self) -> bool {
        self.processing_depth.load(Ordering::Acquire) > 0
    }

    /// UI thread: spin with short sleeps until the device is quiescent. Used
    /// before any plugin-lifecycle call the ABI forbids while `process` is
    /// in flight (activate/deactivate/destroy).
    pub fn wait_for_idle(&self) {
        let mut spins = 0u32;
        while self.is_processing() {
            spins += 1;
            let backoff = if spins < 100 { Duration::from_micros(50) } else { Duration::from_millis(1) };
            std::thread::sleep(backoff);
        }
    }

    pub fn plugin_started(&self, track: usize) -> bool {
        self.plugin_started[track].load(Ordering::Acquire)
    }

    pub fn fx_started(&self, track: usize, fx: usize) -> bool {
        self.fx_started[track][fx].load(Ordering::Acquire)
    }

    /// UI thread: ask the audio thread to call `start_processing` on the
    /// given track's instrument at the start of its next block.
    pub fn request_start_processing(&self, track: usize) {
        self.request_start_processing[track].store(true, Ordering::Release);
    }

    pub fn request_clear_plugin_started(&self, track: usize) {
        self.request_clear_plugin_started[track].store(true, Ordering::Release);
    }

    /// Audio thread: drain pending requests for `track`, applying
    /// `on_start_processing` if one was pending. Called once per block,
    /// before the graph runs.
    pub fn apply_requests<F: FnOnce()>(&self, track: usize, on_start_processing: F) {
        if self.request_start_processing[track].swap(false, Ordering::AcqRel) {
            on_start_processing();
            self.plugin_started[track].store(true, Ordering::Release);
        }
        if self.request_clear_plugin_started[track].swap(false, Ordering::AcqRel) {
            self.plugin_started[track].store(false, Ordering::Release);
        }
    }

    pub fn set_fx_started(&self, track: usize, fx: usize, started: bool) {
        self.fx_started[track][fx].store(started, Ordering::Release);
    }
}
