//! The audio graph (spec §4.E): a DAG of note sources, synths, gains, a
//! mixer, and a master, executed once per block in topological order with
//! the active synth set fanned out across the job pool.

mod node;
mod topo;

use flux_core::limits::{PITCH_MAX, SCENE_MAX};
use flux_core::{Error, Result};
use flux_jobpool::JobPool;
use flux_sequencer::{BlockContext, NoteSource};
use flux_state::StateSnapshot;

pub use node::{NodeKind, NodeSpec};

/// Below this many active synths, the graph runs them sequentially on the
/// calling (audio) thread instead of paying job-pool dispatch overhead
/// (spec §4.E "Parallel-dispatch threshold").
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 3;

struct NodeBuffers {
    l: Vec<f32>,
    r: Vec<f32>,
}

impl NodeBuffers {
    fn new(max_frames: usize) -> Self {
        Self { l: vec![0.0; max_frames], r: vec![0.0; max_frames] }
    }

    fn clear(&mut self, frame_count: usize) {
        self.l[..frame_count].fill(0.0);
        self.r[..frame_count].fill(0.0);
    }
}

pub struct Graph {
    specs: Vec<NodeSpec>,
    render_order: Vec<usize>,
    buffers: Vec<NodeBuffers>,
    note_sources: Vec<Option<NoteSource>>,
    /// This block's events for each note-source node, copied out of the
    /// note source's own scratch list so it survives across the dispatch
    /// of dependent synth nodes.
    events: Vec<Vec<flux_core::event::NoteEvent>>,
    scratch_l: Vec<f32>,
    scratch_r: Vec<f32>,
    max_frames: usize,
    parallel_threshold: usize,
    master_id: usize,
}

impl Graph {
    /// Validate `specs` against the invariants in spec §4.E, topologically
    /// sort them, and allocate per-node scratch buffers.
    pub fn prepare(specs: Vec<NodeSpec>, max_frames: usize, parallel_threshold: usize) -> Result<Self> {
        for (id, spec) in specs.iter().enumerate() {
            match spec.kind {
                NodeKind::Synth { .. } => {
                    let valid = spec.inputs.len() == 1
                        && matches!(specs.get(spec.inputs[0]).map(|s| s.kind), Some(NodeKind::NoteSource { .. }));
                    if !valid {
                        return Err(Error::InvalidGraph(format!(
                            "synth node {id} must have exactly one note_source upstream"
                        )));
                    }
                }
                NodeKind::Gain { .. } => {
                    let valid = spec.inputs.len() == 1
                        && matches!(specs.get(spec.inputs[0]).map(|s| s.kind), Some(NodeKind::Synth { .. }));
                    if !valid {
                        return Err(Error::InvalidGraph(format!("gain node {id} must have exactly one synth upstream")));
                    }
                }
                NodeKind::Master => {
                    if spec.inputs.is_empty() {
                        return Err(Error::InvalidGraph(format!("master node {id} needs at least one input")));
                    }
                }
                _ => {}
            }
        }

        let master_ids: Vec<usize> =
            specs.iter().enumerate().filter(|(_, s)| s.kind == NodeKind::Master).map(|(id, _)| id).collect();
        let master_id = match master_ids.as_slice() {
            [id] => *id,
            [] => return Err(Error::InvalidGraph("graph has no master node".into())),
            _ => return Err(Error::InvalidGraph("graph has more than one master node".into())),
        };

        let edges: Vec<(usize, usize)> =
            specs.iter().enumerate().flat_map(|(id, s)| s.inputs.iter().map(move |&from| (from, id))).collect();
        let render_order = topo::topological_order(specs.len(), &edges)?;

        let buffers = specs.iter().map(|_| NodeBuffers::new(max_frames)).collect();
        let note_sources = specs
            .iter()
            .map(|s| matches!(s.kind, NodeKind::NoteSource { .. }).then(NoteSource::new))
            .collect();
        let events = specs.iter().map(|_| Vec::new()).collect();

        Ok(Self {
            specs,
            render_order,
            buffers,
            note_sources,
            events,
            scratch_l: vec![0.0; max_frames],
            scratch_r: vec![0.0; max_frames],
            max_frames,
            parallel_threshold,
            master_id,
        })
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Run one block (spec §4.E process steps). Returns the master stereo
    /// output for `[0..frame_count)`.
    pub fn process(
        &mut self,
        snapshot: &StateSnapshot,
        sample_rate: f64,
        frame_count: usize,
        steady_time: i64,
        job_pool: &JobPool,
    ) -> (&[f32], &[f32]) {
        assert!(frame_count <= self.max_frames, "block exceeds prepared max_frames");

        for buf in &mut self.buffers {
            buf.clear(frame_count);
        }

        // Step 1.
        let solo_active = snapshot.tracks.iter().any(|t| t.solo);

        // Step 2: note sources run sequentially; negligible cost.
        for id in 0..self.specs.len() {
            let NodeKind::NoteSource { track } = self.specs[id].kind else { continue };
            let Some(note_source) = self.note_sources[id].as_mut() else { continue };

            let live_held: [bool; PITCH_MAX] = snapshot.tracks[track].live_key_held;
            let live_vel: [f32; PITCH_MAX] = snapshot.tracks[track].live_key_velocity;
            let clip_refs: smallvec::SmallVec<[Option<&flux_core::model::PianoClip>; SCENE_MAX]> =
                snapshot.clips[track].iter().map(|c| c.as_deref()).collect();

            let ctx = BlockContext {
                playing: snapshot.transport.playing,
                bpm: snapshot.transport.tempo_bpm,
                sample_rate,
                frame_count,
                clip_slots: &snapshot.clip_slots[track],
                clips: &clip_refs,
                live_key_held: &live_held,
                live_key_velocity: &live_vel,
            };
            let produced = note_source.process_block(&ctx);
            self.events[id].clear();
            self.events[id].extend_from_slice(produced);
        }

        // Step 3: active-synth set.
        let active: Vec<usize> = (0..self.specs.len())
            .filter(|&id| {
                let NodeKind::Synth { track } = self.specs[id].kind else { return false };
                let Some(plugin) = snapshot.track_plugins.get(track).and_then(|p| p.as_ref()) else { return false };
                let note_source_id = self.specs[id].inputs[0];
                let has_events = !self.events[note_source_id].is_empty();
                has_events || !plugin.lock().is_sleeping()
            })
            .collect();

        // Step 4.
        if active.len() < self.parallel_threshold {
            for &id in &active {
                self.run_synth(id, snapshot, frame_count, steady_time);
            }
        } else {
            self.run_synths_parallel(&active, snapshot, frame_count, steady_time, job_pool);
        }

        // Steps 5-6: gain, then mixer/master in render order.
        for i in 0..self.render_order.len() {
            let id = self.render_order[i];
            match self.specs[id].kind {
                NodeKind::Gain { track } => self.run_gain(id, track, frame_count, solo_active, snapshot),
                NodeKind::Mixer | NodeKind::Master => self.run_sum(id, frame_count),
                NodeKind::NoteSource { .. } | NodeKind::Synth { .. } => {}
            }
        }

        let master = &self.buffers[self.master_id];
        (&master.l[..frame_count], &master.r[..frame_count])
    }

    fn run_synth(&self, id: usize, snapshot: &StateSnapshot, frame_count: usize, steady_time: i64) {
        // SAFETY: called either sequentially (no aliasing possible) or from
        // distinct job-pool tasks where `active` contains each id once, so
        // no two tasks ever target the same node's buffer.
        let l_ptr = self.buffers[id].l.as_ptr() as *mut f32;
        let r_ptr = self.buffers[id].r.as_ptr() as *mut f32;
        let out_l = unsafe { std::slice::from_raw_parts_mut(l_ptr, frame_count) };
        let out_r = unsafe { std::slice::from_raw_parts_mut(r_ptr, frame_count) };
        self.run_synth_into(id, snapshot, frame_count, steady_time, out_l, out_r);
    }

    fn run_synth_into(
        &self,
        id: usize,
        snapshot: &StateSnapshot,
        frame_count: usize,
        steady_time: i64,
        out_l: &mut [f32],
        out_r: &mut [f32],
    ) {
        let NodeKind::Synth { track } = self.specs[id].kind else { return };
        let Some(plugin) = snapshot.track_plugins.get(track).and_then(|p| p.as_ref()) else { return };
        let note_source_id = self.specs[id].inputs[0];
        let events = &self.events[note_source_id];
        let mut guard = plugin.lock();
        let status = guard.process(&snapshot.transport_info(), steady_time, frame_count as u32, events, out_l, out_r);
        if status == flux_plugin::ProcessStatus::Error {
            out_l.fill(0.0);
            out_r.fill(0.0);
        }
    }

    fn run_synths_parallel(&self, active: &[usize], snapshot: &StateSnapshot, frame_count: usize, steady_time: i64, job_pool: &JobPool) {
        let buffer_ptrs: Vec<(*mut f32, *mut f32)> =
            self.buffers.iter().map(|b| (b.l.as_ptr() as *mut f32, b.r.as_ptr() as *mut f32)).collect();

        job_pool.submit_batch(active.len(), |i| {
            let id = active[i];
            let (l_ptr, r_ptr) = buffer_ptrs[id];
            // SAFETY: `active` lists each node id at most once, so distinct
            // batch indices never touch the same buffer.
            let out_l = unsafe { std::slice::from_raw_parts_mut(l_ptr, frame_count) };
            let out_r = unsafe { std::slice::from_raw_parts_mut(r_ptr, frame_count) };
            self.run_synth_into(id, snapshot, frame_count, steady_time, out_l, out_r);
        });
    }

    fn run_gain(&mut self, id: usize, track: usize, frame_count: usize, solo_active: bool, snapshot: &StateSnapshot) {
        let input_id = self.specs[id].inputs[0];
        let track_state = &snapshot.tracks[track];
        let factor = if track_state.mute || (solo_active && !track_state.solo) { 0.0 } else { track_state.volume };

        {
            let src = &self.buffers[input_id];
            for i in 0..frame_count {
                self.scratch_l[i] = src.l[i] * factor;
                self.scratch_r[i] = src.r[i] * factor;
            }
        }
        self.buffers[id].l[..frame_count].copy_from_slice(&self.scratch_l[..frame_count]);
        self.buffers[id].r[..frame_count].copy_from_slice(&self.scratch_r[..frame_count]);
    }

    fn run_sum(&mut self, id: usize, frame_count: usize) {
        self.scratch_l[..frame_count].fill(0.0);
        self.scratch_r[..frame_count].fill(0.0);
        for input_idx in 0..self.specs[id].inputs.len() {
            let input_id = self.specs[id].inputs[input_idx];
            let src = &self.buffers[input_id];
            for i in 0..frame_count {
                self.scratch_l[i] += src.l[i];
                self.scratch_r[i] += src.r[i];
            }
        }
        self.buffers[id].l[..frame_count].copy_from_slice(&self.scratch_l[..frame_count]);
        self.buffers[id].r[..frame_count].copy_from_slice(&self.scratch_r[..frame_count]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_rejects_synth_without_note_source() {
        let specs = vec![NodeSpec::master(vec![0]), NodeSpec { kind: NodeKind::Synth { track: 0 }, inputs: vec![] }];
        let err = Graph::prepare(specs, 512, DEFAULT_PARALLEL_THRESHOLD).unwrap_err();
        assert!(matches!(err, Error::InvalidGraph(_)));
    }

    #[test]
    fn prepare_rejects_master_without_inputs() {
        let specs = vec![NodeSpec { kind: NodeKind::Master, inputs: vec![] }];
        let err = Graph::prepare(specs, 512, DEFAULT_PARALLEL_THRESHOLD).unwrap_err();
        assert!(matches!(err, Error::InvalidGraph(_)));
    }

    #[test]
    fn minimal_chain_processes_silence_without_plugin() {
        let note_source = NodeSpec::note_source(0);
        let synth = NodeSpec::synth(0, 0);
        let gain = NodeSpec::gain(0, 1);
        let mixer = NodeSpec::mixer(vec![2]);
        let master = NodeSpec::master(vec![3]);
        let mut graph = Graph::prepare(vec![note_source, synth, gain, mixer, master], 512, DEFAULT_PARALLEL_THRESHOLD)
            .expect("valid graph");

        let snapshot = StateSnapshot::default();
        let job_pool = JobPool::new(2, 1_000);
        let (l, r) = graph.process(&snapshot, 48_000.0, 512, 0, &job_pool);
        assert!(l.iter().all(|&s| s == 0.0));
        assert!(r.iter().all(|&s| s == 0.0));
    }

    /// Two tracks, each with its own synth feeding a gain node, summed at a
    /// shared mixer. With track 1 soloed, only its contribution should reach
    /// the master bus regardless of track 0's volume (spec §8 scenario S5).
    /// Synths are faked by writing directly into their node buffers, since
    /// a real plugin binary isn't available in this test environment.
    #[test]
    fn solo_mutes_every_other_track_at_the_gain_stage() {
        let specs = vec![
            NodeSpec::note_source(0),
            NodeSpec::synth(0, 0),
            NodeSpec::gain(0, 1),
            NodeSpec::note_source(1),
            NodeSpec::synth(1, 3),
            NodeSpec::gain(1, 4),
            NodeSpec::mixer(vec![2, 5]),
            NodeSpec::master(vec![6]),
        ];
        let mut graph = Graph::prepare(specs, 64, DEFAULT_PARALLEL_THRESHOLD).expect("valid graph");

        let track0_synth = 1;
        let track1_synth = 4;
        graph.buffers[track0_synth].l.iter_mut().for_each(|s| *s = 1.0);
        graph.buffers[track0_synth].r.iter_mut().for_each(|s| *s = 1.0);
        graph.buffers[track1_synth].l.iter_mut().for_each(|s| *s = 0.5);
        graph.buffers[track1_synth].r.iter_mut().for_each(|s| *s = 0.5);

        let mut snapshot = StateSnapshot::default();
        snapshot.tracks[0].volume = 1.0;
        snapshot.tracks[1].volume = 1.0;
        snapshot.tracks[1].solo = true;
        let solo_active = snapshot.tracks.iter().any(|t| t.solo);

        graph.run_gain(2, 0, 64, solo_active, &snapshot);
        graph.run_gain(5, 1, 64, solo_active, &snapshot);
        graph.run_sum(6, 64);
        graph.run_sum(7, 64);

        assert!(graph.buffers[2].l.iter().all(|&s| s == 0.0), "muted track must contribute zero");
        assert!(graph.buffers[7].l.iter().all(|&s| (s - 0.5).abs() < 1e-6), "master must equal soloed track only");
    }
}
