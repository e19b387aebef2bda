//! The value copied between UI and audio threads (spec §4.B).
//!
//! Every field here is either `Copy` or an `Arc` clone so that
//! `SharedState::read_snapshot` never allocates on the audio thread: heavy,
//! rarely-changing data (piano clips) is shared via `Arc`, everything else
//! is small fixed-size arrays.

use std::sync::Arc;

use parking_lot::Mutex;

use flux_core::event::TransportInfo;
use flux_core::limits::{PITCH_MAX, SCENE_MAX, TRACK_MAX};
use flux_core::model::{ClipSlot, PianoClip};
use flux_plugin::PluginInstance;

/// Per-track fields the audio thread needs every block. Deliberately
/// smaller than `flux_core::model::Track`: it omits the track name (a
/// UI-only, heap-backed field) so the snapshot stays `Copy`.
#[derive(Debug, Clone, Copy)]
pub struct TrackSnapshot {
    pub volume: f32,
    pub mute: bool,
    pub solo: bool,
    pub live_key_held: [bool; PITCH_MAX],
    pub live_key_velocity: [f32; PITCH_MAX],
}

impl Default for TrackSnapshot {
    fn default() -> Self {
        Self {
            volume: 1.0,
            mute: false,
            solo: false,
            live_key_held: [false; PITCH_MAX],
            live_key_velocity: [0.0; PITCH_MAX],
        }
    }
}

/// Transport fields mirrored into every plugin `process` call (spec §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportSnapshot {
    pub playing: bool,
    pub recording: bool,
    pub tempo_bpm: f64,
    pub position_beats: f64,
    pub position_seconds: f64,
    pub bar_start_beats: f64,
    pub bar_number: i32,
}

impl TransportSnapshot {
    /// Convert to the shape a plugin's `process` call expects (spec §6
    /// Process struct's transport info).
    pub fn to_abi(self) -> TransportInfo {
        TransportInfo {
            playing: self.playing,
            tempo_bpm: self.tempo_bpm,
            position_beats: self.position_beats,
            position_seconds: self.position_seconds,
            bar_start_beats: self.bar_start_beats,
            bar_number: self.bar_number,
        }
    }
}

/// The full UI → audio handoff payload.
#[derive(Clone)]
pub struct StateSnapshot {
    pub tracks: [TrackSnapshot; TRACK_MAX],
    pub clip_slots: [[ClipSlot; SCENE_MAX]; TRACK_MAX],
    /// `None` slots are empty; populated slots hold a shared clip so the UI
    /// can edit a clip in place (copy-on-write at the session-model layer)
    /// without forcing the audio thread to clone note data every block.
    pub clips: [[Option<Arc<PianoClip>>; SCENE_MAX]; TRACK_MAX],
    pub transport: TransportSnapshot,
    /// The plugin instance bound to each track's synth node, if any. Carried
    /// through the same handoff as everything else here so a track's
    /// instrument reference is never read by the audio thread from outside
    /// this snapshot.
    pub track_plugins: [Option<Arc<Mutex<PluginInstance>>>; TRACK_MAX],
}

impl StateSnapshot {
    pub fn transport_info(&self) -> TransportInfo {
        self.transport.to_abi()
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            tracks: std::array::from_fn(|_| TrackSnapshot::default()),
            clip_slots: std::array::from_fn(|_| std::array::from_fn(|_| ClipSlot::default())),
            clips: std::array::from_fn(|_| std::array::from_fn(|_| None)),
            transport: TransportSnapshot::default(),
            track_plugins: std::array::from_fn(|_| None),
        }
    }
}
