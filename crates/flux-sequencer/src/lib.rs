//! Note source (spec §4.C): turns a playing piano clip plus the live
//! keyboard into a sample-accurate stream of note events for one audio
//! block, including wrap-around looping at the clip boundary.

use flux_core::event::{NoteEvent, NoteEventKind};
use flux_core::limits::{EVENT_MAX, PITCH_MAX};
use flux_core::model::{ClipSlot, ClipState, Note, PianoClip};

/// Everything the note source needs to produce one block's events for a
/// single track.
pub struct BlockContext<'a> {
    pub playing: bool,
    pub bpm: f64,
    pub sample_rate: f64,
    pub frame_count: usize,
    /// This track's scene column: `clip_slots[i]` pairs with `clips[i]`.
    pub clip_slots: &'a [ClipSlot],
    pub clips: &'a [Option<&'a PianoClip>],
    pub live_key_held: &'a [bool; PITCH_MAX],
    pub live_key_velocity: &'a [f32; PITCH_MAX],
}

/// Per-track note-source state, carried across blocks.
pub struct NoteSource {
    current_beat: f64,
    active_pitches: [bool; PITCH_MAX],
    last_scene: Option<usize>,
    output: smallvec::SmallVec<[NoteEvent; EVENT_MAX]>,
}

impl Default for NoteSource {
    fn default() -> Self {
        Self {
            current_beat: 0.0,
            active_pitches: [false; PITCH_MAX],
            last_scene: None,
            output: smallvec::SmallVec::new(),
        }
    }
}

impl NoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one block of the algorithm and return the resulting events,
    /// ordered by sample offset with `note_off` before `note_on` at equal
    /// offsets (spec §4.C ordering rule).
    pub fn process_block(&mut self, ctx: &BlockContext<'_>) -> &[NoteEvent] {
        self.output.clear();

        if !ctx.playing {
            self.reconcile_live_only(ctx, 0);
            self.finish_block();
            return &self.output;
        }

        let active_scene = ctx
            .clip_slots
            .iter()
            .position(|slot| slot.state == ClipState::Playing);

        let (scene_idx, clip) = match active_scene.and_then(|i| ctx.clips.get(i).copied().flatten().map(|c| (i, c))) {
            Some(pair) => pair,
            None => {
                self.reconcile_live_only(ctx, 0);
                self.finish_block();
                return &self.output;
            }
        };

        if self.last_scene != Some(scene_idx) {
            self.current_beat = 0.0;
        }
        self.last_scene = Some(scene_idx);

        let beats_per_sample = ctx.bpm / 60.0 / ctx.sample_rate;
        let block_beats = beats_per_sample * ctx.frame_count as f64;
        let beat_start = self.current_beat;
        let beat_end = beat_start + block_beats;
        let clip_len = clip.length_beats;

        self.reconcile_beat_boundary(ctx, clip, beat_start, clip_len);

        if beat_end < clip_len {
            self.process_span(clip, beat_start, beat_end, beat_start, beats_per_sample, 0);
        } else {
            self.process_span(clip, beat_start, clip_len, beat_start, beats_per_sample, 0);
            let first_span_samples = ((clip_len - beat_start) / beats_per_sample).floor() as u32;
            let wrapped_end = beat_end - clip_len;
            self.process_span(clip, 0.0, wrapped_end, 0.0, beats_per_sample, first_span_samples);
        }

        self.current_beat = if beat_end >= clip_len { beat_end - clip_len } else { beat_end };

        self.finish_block();
        &self.output
    }

    /// Reconcile the currently-sounding pitch set against the live keyboard
    /// alone (transport stopped, or no clip playing on this track).
    fn reconcile_live_only(&mut self, ctx: &BlockContext<'_>, offset: u32) {
        for pitch in 0..PITCH_MAX {
            let desired = ctx.live_key_held[pitch];
            self.apply_pitch(pitch, desired, ctx.live_key_velocity[pitch], 0.0, offset);
        }
    }

    /// Step 6: reconcile the pitch set that should be sounding at
    /// `beat_start` (clip notes active there, OR-merged with live keys).
    fn reconcile_beat_boundary(&mut self, ctx: &BlockContext<'_>, clip: &PianoClip, beat_start: f64, clip_len: f64) {
        let mut clip_active = [false; PITCH_MAX];
        for note in clip.notes() {
            if (note.pitch as usize) < PITCH_MAX && note_active_at(note, beat_start, clip_len) {
                clip_active[note.pitch as usize] = true;
            }
        }
        for pitch in 0..PITCH_MAX {
            let desired = clip_active[pitch] || ctx.live_key_held[pitch];
            let velocity = if clip_active[pitch] {
                clip
                    .notes()
                    .iter()
                    .find(|n| n.pitch as usize == pitch)
                    .map(|n| n.velocity)
                    .unwrap_or(ctx.live_key_velocity[pitch])
            } else {
                ctx.live_key_velocity[pitch]
            };
            self.apply_pitch(pitch, desired, velocity, 0.0, 0);
        }
    }

    fn apply_pitch(&mut self, pitch: usize, desired: bool, velocity: f32, release_velocity: f32, offset: u32) {
        let was_active = self.active_pitches[pitch];
        if was_active && !desired {
            self.push_event(NoteEvent {
                kind: NoteEventKind::NoteOff,
                pitch: pitch as u16,
                channel: 0,
                velocity: release_velocity,
                sample_offset: offset,
            });
        } else if !was_active && desired {
            self.push_event(NoteEvent {
                kind: NoteEventKind::NoteOn,
                pitch: pitch as u16,
                channel: 0,
                velocity,
                sample_offset: offset,
            });
        }
        self.active_pitches[pitch] = desired;
    }

    /// Walk every note occurrence (a wrapping note contributes two) that
    /// intersects the half-open span `[span_start, span_end)` and emit the
    /// on/off events that fall strictly inside it.
    fn process_span(
        &mut self,
        clip: &PianoClip,
        span_start: f64,
        span_end: f64,
        beat_start: f64,
        beats_per_sample: f64,
        base_offset: u32,
    ) {
        for note in clip.notes() {
            for (occ_start, occ_end) in note_occurrences(note, clip.length_beats) {
                if occ_start > span_start && occ_start < span_end {
                    let offset = base_offset
                        + ((occ_start - beat_start).max(0.0) / beats_per_sample).floor() as u32;
                    self.push_event(NoteEvent::note_on(note.pitch as u16, 0, note.velocity, offset));
                }
                if occ_end > span_start && occ_end < span_end {
                    let offset = base_offset
                        + ((occ_end - beat_start).max(0.0) / beats_per_sample).floor() as u32;
                    self.push_event(NoteEvent::note_off(note.pitch as u16, 0, note.release_velocity, offset));
                }
            }
        }
    }

    fn push_event(&mut self, event: NoteEvent) {
        if self.output.len() < EVENT_MAX {
            self.output.push(event);
        } else {
            tracing::trace!(pitch = event.pitch, "note source event list full, dropping event");
        }
    }

    /// Stable-sort by sample offset, `note_off` before `note_on` at equal
    /// offsets (spec §4.C ordering rule).
    fn finish_block(&mut self) {
        self.output.sort_by_key(|e| (e.sample_offset, e.kind != NoteEventKind::NoteOff));
    }
}

/// Is `note` sounding at beat position `beat` (which always lies in
/// `[0, clip_len)`), accounting for the note possibly wrapping past the
/// clip boundary.
fn note_active_at(note: &Note, beat: f64, clip_len: f64) -> bool {
    let end = note.end();
    if end <= clip_len {
        note.start <= beat && beat < end
    } else {
        (note.start <= beat && beat < clip_len) || beat < (end - clip_len)
    }
}

/// Return this note's occurrence span(s) within one loop cycle: one span if
/// it fits inside the clip, two (pre-boundary and wrapped tail) if it
/// crosses the clip boundary (spec §4.C step 7).
fn note_occurrences(note: &Note, clip_len: f64) -> smallvec::SmallVec<[(f64, f64); 2]> {
    let mut occurrences = smallvec::SmallVec::new();
    let end = note.end();
    if end <= clip_len {
        occurrences.push((note.start, end));
    } else {
        occurrences.push((note.start, clip_len));
        occurrences.push((0.0, end - clip_len));
    }
    occurrences
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn note(pitch: u8, start: f64, duration: f64) -> Note {
        Note { pitch, start, duration, velocity: 1.0, release_velocity: 0.0 }
    }

    #[test]
    fn stopped_transport_only_reconciles_live_keys() {
        let mut source = NoteSource::new();
        let mut live_held = [false; PITCH_MAX];
        live_held[60] = true;
        let live_vel = [0.8f32; PITCH_MAX];
        let ctx = BlockContext {
            playing: false,
            bpm: 120.0,
            sample_rate: 48_000.0,
            frame_count: 512,
            clip_slots: &[],
            clips: &[],
            live_key_held: &live_held,
            live_key_velocity: &live_vel,
        };
        let events = source.process_block(&ctx).to_vec();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, NoteEventKind::NoteOn);
        assert_eq!(events[0].pitch, 60);
    }

    #[test]
    fn note_on_and_off_fire_within_block() {
        let mut clip = PianoClip::new(4.0);
        clip.push(note(64, 0.0, 1.0));

        let mut source = NoteSource::new();
        let slots = [ClipSlot { state: ClipState::Playing, length_beats: 4.0 }];
        let clip_ref = Some(&clip);
        let clips: [Option<&PianoClip>; 1] = [clip_ref];
        let live_held = [false; PITCH_MAX];
        let live_vel = [0.0f32; PITCH_MAX];

        // bpm=120 => beats_per_sample = 2/48000; one beat ~= 24000 samples.
        // Use a large frame_count so the whole 1-beat note fits in one block.
        let ctx = BlockContext {
            playing: true,
            bpm: 120.0,
            sample_rate: 48_000.0,
            frame_count: 48_000,
            clip_slots: &slots,
            clips: &clips,
            live_key_held: &live_held,
            live_key_velocity: &live_vel,
        };
        let events = source.process_block(&ctx).to_vec();
        let on = events.iter().find(|e| e.kind == NoteEventKind::NoteOn && e.pitch == 64);
        let off = events.iter().find(|e| e.kind == NoteEventKind::NoteOff && e.pitch == 64);
        assert!(on.is_some());
        assert!(off.is_some());
        assert!(off.unwrap().sample_offset > on.unwrap().sample_offset);
    }

    #[test]
    fn wrap_around_note_emits_on_then_off_next_cycle() {
        // A note that starts near the end of a short clip and wraps.
        let mut clip = PianoClip::new(1.0);
        clip.push(note(70, 0.75, 0.5)); // ends at 1.25, wraps to 0.25

        let mut source = NoteSource::new();
        let slots = [ClipSlot { state: ClipState::Playing, length_beats: 1.0 }];
        let clip_ref = Some(&clip);
        let clips: [Option<&PianoClip>; 1] = [clip_ref];
        let live_held = [false; PITCH_MAX];
        let live_vel = [0.0f32; PITCH_MAX];

        let ctx = BlockContext {
            playing: true,
            bpm: 120.0,
            sample_rate: 48_000.0,
            frame_count: 48_000, // one full beat per block at this tempo
            clip_slots: &slots,
            clips: &clips,
            live_key_held: &live_held,
            live_key_velocity: &live_vel,
        };

        let first = source.process_block(&ctx).to_vec();
        assert!(first.iter().any(|e| e.pitch == 70 && e.kind == NoteEventKind::NoteOn));

        let second = source.process_block(&ctx).to_vec();
        assert!(second.iter().any(|e| e.pitch == 70 && e.kind == NoteEventKind::NoteOff));
    }

    #[test]
    fn event_list_caps_at_event_max() {
        let mut clip = PianoClip::new(4.0);
        for p in 0..120u8 {
            clip.push(note(p, 0.0, 4.0));
        }
        let mut source = NoteSource::new();
        let slots = [ClipSlot { state: ClipState::Playing, length_beats: 4.0 }];
        let clip_ref = Some(&clip);
        let clips: [Option<&PianoClip>; 1] = [clip_ref];
        let live_held = [false; PITCH_MAX];
        let live_vel = [0.0f32; PITCH_MAX];
        let ctx = BlockContext {
            playing: true,
            bpm: 120.0,
            sample_rate: 48_000.0,
            frame_count: 512,
            clip_slots: &slots,
            clips: &clips,
            live_key_held: &live_held,
            live_key_velocity: &live_vel,
        };
        let events = source.process_block(&ctx);
        assert!(events.len() <= EVENT_MAX);
    }

    proptest! {
        /// `note_active_at` must agree with `note_occurrences` at every beat
        /// in the clip, including across the wrap-around boundary (spec §4.C
        /// step 7, testable invariant 5): a beat is active iff it falls
        /// inside one of the note's occurrence spans for this loop cycle.
        #[test]
        fn wrap_around_activity_matches_occurrence_spans(
            clip_len in 0.5f64..8.0,
            start_frac in 0.0f64..1.0,
            duration_frac in 0.01f64..1.0,
            beat_frac in 0.0f64..1.0,
        ) {
            let start = start_frac * clip_len;
            let duration = duration_frac * clip_len;
            let beat = beat_frac * clip_len;
            let note = note(60, start, duration);

            let occurrences = note_occurrences(&note, clip_len);
            let expected = occurrences.iter().any(|&(s, e)| s <= beat && beat < e);
            prop_assert_eq!(note_active_at(&note, beat, clip_len), expected);
        }

        /// A wrapping note always splits into exactly two occurrence spans
        /// whose combined length equals the note's duration, and neither
        /// span crosses the clip boundary (spec §4.C step 7 / invariant 5).
        #[test]
        fn wrapping_note_occurrences_preserve_total_duration(
            clip_len in 0.5f64..8.0,
            start_frac in 0.0f64..1.0,
            wrap_frac in 0.01f64..1.0,
        ) {
            let start = start_frac * clip_len;
            let wrap_amount = wrap_frac * clip_len;
            let duration = (clip_len - start) + wrap_amount;
            let note = note(60, start, duration);
            prop_assert!(note.end() > clip_len);

            let occurrences = note_occurrences(&note, clip_len);
            prop_assert_eq!(occurrences.len(), 2);

            let (first_start, first_end) = occurrences[0];
            let (second_start, second_end) = occurrences[1];
            prop_assert_eq!(first_start, start);
            prop_assert_eq!(first_end, clip_len);
            prop_assert_eq!(second_start, 0.0);
            prop_assert!((second_end - wrap_amount).abs() < 1e-9);

            let total = (first_end - first_start) + (second_end - second_start);
            prop_assert!((total - note.duration).abs() < 1e-9);
        }
    }
}
