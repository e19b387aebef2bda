//! Transport and clip-launcher state machine (spec §4.G): scene launch,
//! quantized promotion, record arm/finalize, and the per-track slot
//! exclusivity invariant. Owned and driven entirely from the UI thread; the
//! audio thread only ever reads the resulting matrix through a
//! [`flux_state::StateSnapshot`].

use std::sync::Arc;

use flux_core::limits::{SCENE_MAX, TRACK_MAX};
use flux_core::model::{ClipSlot, ClipState, Note, PianoClip};

/// Selectable quantize grids for queued launches and record promotion
/// (spec §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizeGrid {
    Quarter,
    Half,
    One,
    Two,
    Four,
}

impl QuantizeGrid {
    pub fn beats(self) -> f64 {
        match self {
            Self::Quarter => 0.25,
            Self::Half => 0.5,
            Self::One => 1.0,
            Self::Two => 2.0,
            Self::Four => 4.0,
        }
    }
}

/// The clip-launcher matrix plus the playhead and quantize state.
pub struct Transport {
    pub clip_slots: [[ClipSlot; SCENE_MAX]; TRACK_MAX],
    pub clips: [[Option<Arc<PianoClip>>; SCENE_MAX]; TRACK_MAX],
    queued_scene: [Option<usize>; TRACK_MAX],
    record_start_beat: [[Option<f64>; SCENE_MAX]; TRACK_MAX],
    one_shot: [[bool; SCENE_MAX]; TRACK_MAX],

    pub playing: bool,
    pub playhead_beat: f64,
    pub tempo_bpm: f64,
    pub quantize: QuantizeGrid,
}

impl Transport {
    pub fn new(tempo_bpm: f64) -> Self {
        Self {
            clip_slots: std::array::from_fn(|_| std::array::from_fn(|_| ClipSlot::empty())),
            clips: std::array::from_fn(|_| std::array::from_fn(|_| None)),
            queued_scene: [None; TRACK_MAX],
            record_start_beat: std::array::from_fn(|_| [None; SCENE_MAX]),
            one_shot: std::array::from_fn(|_| [false; SCENE_MAX]),
            playing: false,
            playhead_beat: 0.0,
            tempo_bpm,
            quantize: QuantizeGrid::One,
        }
    }

    /// Launch scene `scene` while stopped: the scene plays immediately and
    /// transport starts (spec §4.G "Launch scene s while not playing").
    fn launch_scene_stopped(&mut self, scene: usize) {
        for track in 0..TRACK_MAX {
            if self.clip_slots[track][scene].is_empty() {
                continue;
            }
            for s in 0..SCENE_MAX {
                self.clip_slots[track][s].state =
                    if s == scene { ClipState::Playing } else if self.clip_slots[track][s].is_empty() { ClipState::Empty } else { ClipState::Stopped };
            }
        }
        self.playing = true;
        self.playhead_beat = 0.0;
    }

    /// Launch scene `scene` while playing: touched slots queue, promoted at
    /// the next quantize boundary (spec §4.G "Launch scene s while
    /// playing").
    fn launch_scene_playing(&mut self, scene: usize) {
        for track in 0..TRACK_MAX {
            if self.clip_slots[track][scene].is_empty() {
                continue;
            }
            if let Some(previous) = self.queued_scene[track] {
                if self.clip_slots[track][previous].state == ClipState::Queued {
                    self.clip_slots[track][previous].state = ClipState::Stopped;
                }
            }
            self.clip_slots[track][scene].state = ClipState::Queued;
            self.queued_scene[track] = Some(scene);
        }
    }

    pub fn launch_scene(&mut self, scene: usize) {
        if self.playing {
            self.launch_scene_playing(scene);
        } else {
            self.launch_scene_stopped(scene);
        }
    }

    /// All non-empty slots stop; transport keeps running (spec §4.G "Stop
    /// all").
    pub fn stop_all(&mut self) {
        for track in 0..TRACK_MAX {
            for scene in 0..SCENE_MAX {
                if !self.clip_slots[track][scene].is_empty() {
                    self.clip_slots[track][scene].state = ClipState::Stopped;
                }
            }
            self.queued_scene[track] = None;
        }
    }

    /// Record-arm slot `(track, scene)` (spec §4.G "Record arm slot (t, s)
    /// while not playing" / "while playing"). `default_length_beats` seeds a
    /// newly-created clip; `one_shot` selects the finalize action: stop
    /// (true) or loop into `playing` (false).
    pub fn record_arm(&mut self, track: usize, scene: usize, default_length_beats: f64, one_shot: bool) {
        self.one_shot[track][scene] = one_shot;

        if self.clips[track][scene].is_none() {
            self.clips[track][scene] = Some(Arc::new(PianoClip::new(default_length_beats)));
            self.clip_slots[track][scene].length_beats = default_length_beats;
        }

        if self.playing {
            self.clip_slots[track][scene].state = ClipState::RecordQueued;
        } else {
            self.clip_slots[track][scene].state = ClipState::Recording;
            self.record_start_beat[track][scene] = Some(0.0);
            self.playing = true;
            self.playhead_beat = 0.0;
        }
    }

    /// Advance the playhead by one UI tick and promote any queued slots that
    /// crossed the quantize grid (spec §4.G "Quantize grid").
    pub fn tick(&mut self, dt_seconds: f64) {
        if !self.playing {
            return;
        }
        let previous_phase = self.playhead_beat % self.quantize.beats();
        self.playhead_beat += (self.tempo_bpm / 60.0) * dt_seconds;
        let phase = self.playhead_beat % self.quantize.beats();

        if phase < previous_phase {
            self.promote_queued();
        }

        self.check_record_completion();
    }

    fn promote_queued(&mut self) {
        for track in 0..TRACK_MAX {
            let Some(scene) = self.queued_scene[track].take() else { continue };
            tracing::trace!(track, scene, "promoting queued scene at quantize boundary");
            for s in 0..SCENE_MAX {
                match self.clip_slots[track][s].state {
                    ClipState::Playing if s != scene => self.clip_slots[track][s].state = ClipState::Stopped,
                    ClipState::Queued if s == scene => self.clip_slots[track][s].state = ClipState::Playing,
                    ClipState::RecordQueued if s == scene => {
                        self.clip_slots[track][s].state = ClipState::Recording;
                        self.record_start_beat[track][s] = Some(self.playhead_beat);
                    }
                    _ => {}
                }
            }
        }
    }

    fn check_record_completion(&mut self) {
        for track in 0..TRACK_MAX {
            for scene in 0..SCENE_MAX {
                if self.clip_slots[track][scene].state != ClipState::Recording {
                    continue;
                }
                let Some(start) = self.record_start_beat[track][scene] else { continue };
                let target_length = self.clip_slots[track][scene].length_beats;
                if self.playhead_beat - start >= target_length {
                    self.clip_slots[track][scene].state =
                        if self.one_shot[track][scene] { ClipState::Stopped } else { ClipState::Playing };
                    self.record_start_beat[track][scene] = None;
                }
            }
        }
    }

    /// The scene index currently recording on `track`, if any.
    pub fn recording_scene(&self, track: usize) -> Option<usize> {
        (0..SCENE_MAX).find(|&s| self.clip_slots[track][s].state == ClipState::Recording)
    }

    /// Flush a finalized note (the UI detected a live-key release) into the
    /// clip currently recording on `track`, if one is (spec §4.G "Held
    /// notes flush as finalized notes into the piano clip").
    pub fn flush_live_note(&mut self, track: usize, note: Note) {
        let Some(scene) = self.recording_scene(track) else { return };
        let Some(clip) = self.clips[track][scene].as_mut() else { return };
        Arc::make_mut(clip).push(note);
    }

    /// Verify the slot-exclusivity invariant (spec §4.G, §8 property 2):
    /// at most one slot per track may be in an exclusive state.
    pub fn check_exclusivity(&self) -> bool {
        (0..TRACK_MAX).all(|track| {
            self.clip_slots[track].iter().filter(|slot| slot.state.is_exclusive()).count() <= 1
        })
    }
}
