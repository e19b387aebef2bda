//! Session data model (spec §3): clip slots, piano clips, tracks.
//!
//! These are plain value types with no behavior beyond construction and
//! validation — the state machines that mutate them live in
//! `flux-transport` and `flux-sequencer`.

use smallvec::SmallVec;

use crate::limits::CLIP_NOTE_MAX;

/// State of a single (track, scene) clip slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipState {
    #[default]
    Empty,
    Stopped,
    Queued,
    Playing,
    RecordQueued,
    Recording,
}

impl ClipState {
    /// The states covered by the slot-exclusivity invariant (spec §3, §4.G,
    /// §8 property 2): at most one slot per track may be in one of these.
    pub fn is_exclusive(self) -> bool {
        matches!(self, Self::Queued | Self::Playing | Self::RecordQueued | Self::Recording)
    }
}

/// A track/scene matrix slot. `length_beats` is only meaningful once the
/// slot holds a clip (state != Empty); it must stay positive.
#[derive(Debug, Clone, Copy)]
pub struct ClipSlot {
    pub state: ClipState,
    pub length_beats: f64,
}

impl Default for ClipSlot {
    fn default() -> Self {
        Self { state: ClipState::Empty, length_beats: 1.0 }
    }
}

impl ClipSlot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.state == ClipState::Empty
    }
}

/// A single note within a piano clip. Notes may cross the clip boundary
/// (`start + duration > length_beats`); such notes wrap modulo
/// `length_beats` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub pitch: u8,
    pub start: f64,
    pub duration: f64,
    pub velocity: f32,
    pub release_velocity: f32,
}

impl Note {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// A fixed-capacity piano-roll clip: notes plus a loop length in beats.
#[derive(Debug, Clone)]
pub struct PianoClip {
    notes: SmallVec<[Note; CLIP_NOTE_MAX]>,
    pub length_beats: f64,
}

impl PianoClip {
    pub fn new(length_beats: f64) -> Self {
        assert!(length_beats > 0.0, "clip length must be positive");
        Self { notes: SmallVec::new(), length_beats }
    }

    /// Push a note. Silently drops the note past capacity, matching the
    /// fixed-capacity realtime-safety policy used for the event list
    /// (spec §4.C "best effort on overflow").
    pub fn push(&mut self, note: Note) {
        if self.notes.len() < CLIP_NOTE_MAX {
            self.notes.push(note);
        }
    }

    pub fn notes(&self) -> &[Note] {
        self.notes.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

/// Per-track state (spec §3).
#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub volume: f32,
    pub mute: bool,
    pub solo: bool,
    /// Live-keyboard state: which pitches are currently held by the UI
    /// keyboard/MIDI-in, and at what velocity.
    pub live_key_held: [bool; crate::limits::PITCH_MAX],
    pub live_key_velocity: [f32; crate::limits::PITCH_MAX],
}

impl Default for Track {
    fn default() -> Self {
        Self {
            name: String::new(),
            volume: 1.0,
            mute: false,
            solo: false,
            live_key_held: [false; crate::limits::PITCH_MAX],
            live_key_velocity: [0.0; crate::limits::PITCH_MAX],
        }
    }
}

impl Track {
    /// Clamp volume into the valid range (spec §3: volume ∈ [0, 1.5]).
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.5);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_state_exclusivity_set() {
        assert!(ClipState::Queued.is_exclusive());
        assert!(ClipState::Playing.is_exclusive());
        assert!(ClipState::RecordQueued.is_exclusive());
        assert!(ClipState::Recording.is_exclusive());
        assert!(!ClipState::Empty.is_exclusive());
        assert!(!ClipState::Stopped.is_exclusive());
    }

    #[test]
    fn piano_clip_drops_past_capacity() {
        let mut clip = PianoClip::new(4.0);
        for i in 0..CLIP_NOTE_MAX + 10 {
            clip.push(Note {
                pitch: (i % 128) as u8,
                start: 0.0,
                duration: 1.0,
                velocity: 1.0,
                release_velocity: 0.0,
            });
        }
        assert_eq!(clip.notes().len(), CLIP_NOTE_MAX);
    }

    #[test]
    fn track_volume_clamped() {
        let mut t = Track::default();
        t.set_volume(3.0);
        assert_eq!(t.volume, 1.5);
        t.set_volume(-1.0);
        assert_eq!(t.volume, 0.0);
    }
}
