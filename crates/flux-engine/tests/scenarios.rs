//! End-to-end scenarios S1-S6 (spec §8). One test per scenario.
//!
//! S5 (mute + solo) and S6 (buffer-size change under a live plugin) both
//! need a loaded CLAP instrument to produce non-silent audio to mix or to
//! reactivate across the resize — `flux_graph::Graph` only ever reads audio
//! out of a `Synth` node's buffer, and that buffer is only written by a
//! bound `PluginInstance::process` call. This workspace carries no compiled
//! `.clap` fixture to load, so S5 and S6 are not implemented as executable
//! tests here; see DESIGN.md for the grounding note. S1-S4 need nothing but
//! the note source, transport, and graph, and are implemented in full below.

use flux_core::limits::PITCH_MAX;
use flux_core::model::{ClipSlot, ClipState, Note, PianoClip};
use flux_graph::{Graph, NodeSpec};
use flux_jobpool::JobPool;
use flux_sequencer::{BlockContext, NoteSource};
use flux_state::StateSnapshot;
use flux_transport::{QuantizeGrid, Transport};

/// S1 (silence): no clips, `playing=false`, `sample_rate=48000`,
/// `max_frames=128`. Expected: master output is exactly zero across 10
/// blocks, and the note source emits zero events.
#[test]
fn s1_silence() {
    let specs = vec![
        NodeSpec::note_source(0),
        NodeSpec::synth(0, 0),
        NodeSpec::gain(0, 1),
        NodeSpec::mixer(vec![2]),
        NodeSpec::master(vec![3]),
    ];
    let mut graph = Graph::prepare(specs, 128, flux_graph::DEFAULT_PARALLEL_THRESHOLD).unwrap();
    let job_pool = JobPool::new(2, 1_000);
    let snapshot = StateSnapshot::default();

    for block in 0..10 {
        let (l, r) = graph.process(&snapshot, 48_000.0, 128, (block * 128) as i64, &job_pool);
        assert!(l.iter().all(|&s| s == 0.0), "block {block} left channel not silent");
        assert!(r.iter().all(|&s| s == 0.0), "block {block} right channel not silent");
    }

    let mut source = NoteSource::new();
    let live_held = [false; PITCH_MAX];
    let live_vel = [0.0f32; PITCH_MAX];
    let ctx = BlockContext {
        playing: false,
        bpm: 120.0,
        sample_rate: 48_000.0,
        frame_count: 128,
        clip_slots: &[],
        clips: &[],
        live_key_held: &live_held,
        live_key_velocity: &live_vel,
    };
    assert!(source.process_block(&ctx).is_empty());
}

/// S2 (single note, loop): single track, single scene, `bpm=120`,
/// `length_beats=4`, one note `{pitch=60, start=0, duration=2}`,
/// `playing=true`. Run the exact block count the scenario names (750 blocks
/// of 128 frames at 48kHz covers one full 4-beat loop). Expected: exactly
/// one `note_on(pitch=60)` and one `note_off(pitch=60)`, at sample offsets
/// that reconstruct to `note.start` and `note.start+note.duration` within
/// ±1 sample.
#[test]
fn s2_single_note_loop() {
    let mut clip = PianoClip::new(4.0);
    clip.push(Note { pitch: 60, start: 0.0, duration: 2.0, velocity: 1.0, release_velocity: 0.0 });
    let slots = [ClipSlot { state: ClipState::Playing, length_beats: 4.0 }];
    let clips: [Option<&PianoClip>; 1] = [Some(&clip)];
    let live_held = [false; PITCH_MAX];
    let live_vel = [0.0f32; PITCH_MAX];

    let mut source = NoteSource::new();
    let mut ons = Vec::new();
    let mut offs = Vec::new();
    for block in 0..750u64 {
        let ctx = BlockContext {
            playing: true,
            bpm: 120.0,
            sample_rate: 48_000.0,
            frame_count: 128,
            clip_slots: &slots,
            clips: &clips,
            live_key_held: &live_held,
            live_key_velocity: &live_vel,
        };
        for event in source.process_block(&ctx) {
            if event.pitch != 60 {
                continue;
            }
            let global_offset = block * 128 + event.sample_offset as u64;
            match event.kind {
                flux_core::event::NoteEventKind::NoteOn => ons.push(global_offset),
                flux_core::event::NoteEventKind::NoteOff => offs.push(global_offset),
            }
        }
    }

    assert_eq!(ons.len(), 1, "expected exactly one note_on across the loop, got {ons:?}");
    assert_eq!(offs.len(), 1, "expected exactly one note_off across the loop, got {offs:?}");
    assert!(ons[0] <= 1, "note_on should land within 1 sample of beat 0, got {}", ons[0]);
    // beats_per_sample = 120/60/48000 = 1/24000; note.start+duration = 2 beats => 48000 samples.
    assert!((offs[0] as i64 - 48_000i64).abs() <= 1, "note_off should land within 1 sample of beat 2, got {}", offs[0]);
}

/// S3 (wrap-around note): `length_beats=2`, note `{pitch=64, start=1.5,
/// duration=1.0}` (wraps to 0.5), `bpm=120`. Expected: every loop emits
/// exactly one `note_on` and one `note_off`, the `note_off` following the
/// `note_on` into the next cycle.
#[test]
fn s3_wrap_around_note() {
    let mut clip = PianoClip::new(2.0);
    clip.push(Note { pitch: 64, start: 1.5, duration: 1.0, velocity: 1.0, release_velocity: 0.0 });
    let slots = [ClipSlot { state: ClipState::Playing, length_beats: 2.0 }];
    let clips: [Option<&PianoClip>; 1] = [Some(&clip)];
    let live_held = [false; PITCH_MAX];
    let live_vel = [0.0f32; PITCH_MAX];

    let mut source = NoteSource::new();
    // 2 beats at bpm=120 (2 beats/sec) = 1 second = 48000 samples per loop;
    // run 3 full loops (1125 blocks of 128 frames) to see the pattern repeat.
    let mut on_count = 0usize;
    let mut off_count = 0usize;
    for _ in 0..1125u64 {
        let ctx = BlockContext {
            playing: true,
            bpm: 120.0,
            sample_rate: 48_000.0,
            frame_count: 128,
            clip_slots: &slots,
            clips: &clips,
            live_key_held: &live_held,
            live_key_velocity: &live_vel,
        };
        for event in source.process_block(&ctx) {
            if event.pitch != 64 {
                continue;
            }
            match event.kind {
                flux_core::event::NoteEventKind::NoteOn => on_count += 1,
                flux_core::event::NoteEventKind::NoteOff => off_count += 1,
            }
        }
    }

    assert_eq!(on_count, 3, "expected one note_on per loop across 3 loops");
    assert_eq!(off_count, 3, "expected one note_off per loop across 3 loops");
}

/// S4 (quantized scene switch): two scenes, each with one clip on track 0
/// with distinct pitches (60 and 67). Launch scene 1 at `playhead_beat=0.7`
/// with `quantize=1 beat`. Expected: at `playhead_beat=1.0` scene 0's clip
/// has transitioned to stopped, scene 1's to playing, and the first note the
/// note source emits at or after that boundary is pitch 67.
#[test]
fn s4_quantized_scene_switch() {
    let mut transport = Transport::new(120.0);
    transport.quantize = QuantizeGrid::One;

    transport.clips[0][0] = Some(std::sync::Arc::new({
        let mut clip = PianoClip::new(4.0);
        clip.push(Note { pitch: 60, start: 0.0, duration: 4.0, velocity: 1.0, release_velocity: 0.0 });
        clip
    }));
    transport.clip_slots[0][0] = ClipSlot { state: ClipState::Stopped, length_beats: 4.0 };

    transport.clips[0][1] = Some(std::sync::Arc::new({
        let mut clip = PianoClip::new(4.0);
        clip.push(Note { pitch: 67, start: 0.0, duration: 4.0, velocity: 1.0, release_velocity: 0.0 });
        clip
    }));
    transport.clip_slots[0][1] = ClipSlot { state: ClipState::Stopped, length_beats: 4.0 };

    // Launching while stopped starts the transport and plays scene 0 immediately.
    transport.launch_scene(0);
    assert_eq!(transport.clip_slots[0][0].state, ClipState::Playing);

    // Bring the playhead to 0.7 beats, then queue scene 1.
    transport.tick(0.7 / (transport.tempo_bpm / 60.0));
    transport.launch_scene(1);
    assert_eq!(transport.clip_slots[0][1].state, ClipState::Queued);

    // Cross the 1-beat boundary: queued scene 1 promotes, scene 0 stops.
    transport.tick(0.3 / (transport.tempo_bpm / 60.0));
    assert!(transport.playhead_beat >= 1.0);
    assert_eq!(transport.clip_slots[0][0].state, ClipState::Stopped);
    assert_eq!(transport.clip_slots[0][1].state, ClipState::Playing);

    let clip_refs: [Option<&PianoClip>; 2] =
        [transport.clips[0][0].as_deref(), transport.clips[0][1].as_deref()];
    let live_held = [false; PITCH_MAX];
    let live_vel = [0.0f32; PITCH_MAX];
    let mut source = NoteSource::new();
    let ctx = BlockContext {
        playing: true,
        bpm: 120.0,
        sample_rate: 48_000.0,
        frame_count: 256,
        clip_slots: &transport.clip_slots[0],
        clips: &clip_refs,
        live_key_held: &live_held,
        live_key_velocity: &live_vel,
    };
    let events = source.process_block(&ctx);
    let first_on = events.iter().find(|e| e.kind == flux_core::event::NoteEventKind::NoteOn);
    assert_eq!(first_on.map(|e| e.pitch), Some(67), "first note after the switch must be scene 1's pitch");
}
