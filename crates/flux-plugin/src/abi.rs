//! Thin re-exports of the plugin ABI surface this host actually touches
//! (spec §6). The core's plugin contract is the CLAP ABI; `clap-sys`
//! supplies the `repr(C)` struct and constant definitions, we only name the
//! subset we call.

pub use clap_sys::audio_buffer::clap_audio_buffer;
pub use clap_sys::entry::clap_plugin_entry;
pub use clap_sys::events::{
    clap_event_header, clap_event_note, clap_event_transport, clap_input_events, clap_output_events,
    CLAP_CORE_EVENT_SPACE_ID, CLAP_EVENT_NOTE_OFF, CLAP_EVENT_NOTE_ON,
};
pub use clap_sys::ext::thread_check::{clap_host_thread_check, CLAP_EXT_THREAD_CHECK};
pub use clap_sys::ext::thread_pool::{clap_host_thread_pool, clap_plugin_thread_pool, CLAP_EXT_THREAD_POOL};
pub use clap_sys::factory::plugin_factory::{clap_plugin_factory, CLAP_PLUGIN_FACTORY_ID};
pub use clap_sys::host::clap_host;
pub use clap_sys::plugin::clap_plugin;
pub use clap_sys::process::{
    clap_process, CLAP_PROCESS_CONTINUE, CLAP_PROCESS_CONTINUE_IF_NOT_QUIET, CLAP_PROCESS_ERROR,
    CLAP_PROCESS_SLEEP, CLAP_PROCESS_TAIL,
};
pub use clap_sys::version::CLAP_VERSION;

/// Outcome of a single `process` call (spec §4.D), collapsed from
/// `clap-sys`'s raw `i32` status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Continue,
    ContinueIfNotQuiet,
    Tail,
    Sleep,
    Error,
}

impl ProcessStatus {
    pub(crate) fn from_raw(raw: i32) -> Self {
        match raw {
            r if r == CLAP_PROCESS_CONTINUE => Self::Continue,
            r if r == CLAP_PROCESS_CONTINUE_IF_NOT_QUIET => Self::ContinueIfNotQuiet,
            r if r == CLAP_PROCESS_TAIL => Self::Tail,
            r if r == CLAP_PROCESS_SLEEP => Self::Sleep,
            _ => Self::Error,
        }
    }
}
