//! Compile-time capacities for the realtime-safe, allocation-free snapshot.
//!
//! Fixed-size arrays throughout `StateSnapshot` are intentional: the audio
//! thread must never allocate while copying or reading a snapshot.

/// Maximum number of tracks a session may have.
pub const TRACK_MAX: usize = 16;

/// Maximum number of scenes (clip-launcher columns) a session may have.
pub const SCENE_MAX: usize = 32;

/// Maximum number of notes a single piano clip may hold.
pub const CLIP_NOTE_MAX: usize = 256;

/// Maximum number of note events a note source may emit in a single block.
pub const EVENT_MAX: usize = 128;

/// Maximum number of pitches tracked per track (MIDI note range).
pub const PITCH_MAX: usize = 128;

/// Maximum nesting depth for plugin thread-pool recursion (spec.md §9: the
/// source disagreed between 4 and 16; this spec canonicalizes 4).
pub const MAX_THREAD_POOL_NESTING: usize = 4;

/// Maximum number of concurrently in-flight job-pool batches (nesting cap
/// plus headroom for independent top-level submitters).
pub const MAX_BATCH_SLOTS: usize = 8;

/// Maximum number of effect-chain slots per track (spec §3 gain/fx nodes).
pub const FX_MAX: usize = 8;
