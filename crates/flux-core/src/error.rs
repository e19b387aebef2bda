//! Error taxonomy shared across the flux workspace (spec §7).

use thiserror::Error;

/// Errors that can occur anywhere in the flux core.
///
/// Audio-thread errors never propagate as `Result` across the plugin ABI
/// boundary (spec §7's propagation policy) — they are converted to counters
/// and silence at the point of origin. This enum exists for the UI-thread
/// call sites (graph prepare, plugin load, buffer-size change) where a typed
/// return value is the correct shape.
#[derive(Error, Debug)]
pub enum Error {
    /// Fatal at prepare time: the node/connection set does not form a valid
    /// DAG, or a connection's port kinds don't match.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A plugin failed to load, init, or activate. The track falls back to
    /// silence; this is recorded against the track, not fatal to the engine.
    #[error("plugin load failed: {0}")]
    PluginLoadFailed(String),

    /// A single `process` call returned `error`. Non-fatal; the node outputs
    /// silence for the block and is retried next block.
    #[error("plugin process error on node {node}")]
    PluginProcessError { node: u32 },

    /// The device callback missed its deadline.
    #[error("device underrun: {elapsed_us}us over a {budget_us}us budget")]
    DeviceUnderrun { elapsed_us: u64, budget_us: u64 },

    /// Job-pool nesting exceeded the configured cap; execution fell back to
    /// the calling thread. Not user-visible, but worth a counter.
    #[error("job pool exhausted, ran inline")]
    PoolExhausted,

    /// The device callback fired before the UI pushed any snapshot.
    #[error("no snapshot available yet")]
    SnapshotUnavailable,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;
