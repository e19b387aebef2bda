//! Node and connection types for the audio graph (spec §4.E).

/// What a node does. `inputs` on the owning [`NodeSpec`] carries the
/// upstream node ids; for [`NodeKind::Synth`] that upstream is the note
/// source feeding its events, not an audio signal (spec §4.E invariants:
/// synth nodes' audio inputs are always empty buffers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    NoteSource { track: usize },
    Synth { track: usize },
    Gain { track: usize },
    Mixer,
    Master,
}

/// A node plus its upstream node ids (graph-local indices).
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub kind: NodeKind,
    pub inputs: Vec<usize>,
}

impl NodeSpec {
    pub fn note_source(track: usize) -> Self {
        Self { kind: NodeKind::NoteSource { track }, inputs: Vec::new() }
    }

    pub fn synth(track: usize, note_source_id: usize) -> Self {
        Self { kind: NodeKind::Synth { track }, inputs: vec![note_source_id] }
    }

    pub fn gain(track: usize, synth_id: usize) -> Self {
        Self { kind: NodeKind::Gain { track }, inputs: vec![synth_id] }
    }

    pub fn mixer(inputs: Vec<usize>) -> Self {
        Self { kind: NodeKind::Mixer, inputs }
    }

    pub fn master(inputs: Vec<usize>) -> Self {
        Self { kind: NodeKind::Master, inputs }
    }
}
