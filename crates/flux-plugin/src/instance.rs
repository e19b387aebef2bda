//! Plugin lifecycle and per-block processing (spec §4.D): `load → init →
//! activate → start_processing → process* → stop_processing → deactivate →
//! destroy`, grounded on `ClapInstance` in the teacher's `clap_loader.rs`
//! but generalized to the full status/extension contract spec §4.D and §6
//! describe.

use std::ffi::{CStr, CString};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use smallvec::SmallVec;

use flux_core::event::{NoteEvent, NoteEventKind, TransportInfo};
use flux_core::limits::EVENT_MAX;
use flux_core::{Error, Result};
use flux_jobpool::JobPool;

use crate::abi::*;
use crate::bridge::ThreadPoolBridge;
use crate::host;

/// Input event list handed to a plugin's `process` call, built fresh each
/// block from the note source's events (spec §4.D/§6). `list` must stay the
/// first field: the host callbacks below recover this struct from the bare
/// `clap_input_events` pointer CLAP hands back.
#[repr(C)]
struct InputEventList {
    list: clap_input_events,
    events: SmallVec<[clap_event_note; EVENT_MAX]>,
}

impl InputEventList {
    fn new(notes: &[NoteEvent]) -> Self {
        let events = notes.iter().map(to_clap_note).collect();
        let list = clap_input_events { ctx: ptr::null_mut(), size: Some(input_events_size), get: Some(input_events_get) };
        Self { list, events }
    }
}

fn to_clap_note(event: &NoteEvent) -> clap_event_note {
    let type_ = match event.kind {
        NoteEventKind::NoteOn => CLAP_EVENT_NOTE_ON,
        NoteEventKind::NoteOff => CLAP_EVENT_NOTE_OFF,
    };
    clap_event_note {
        header: clap_event_header {
            size: std::mem::size_of::<clap_event_note>() as u32,
            time: event.sample_offset,
            space_id: CLAP_CORE_EVENT_SPACE_ID,
            type_,
            flags: 0,
        },
        note_id: -1,
        port_index: 0,
        channel: event.channel as i16,
        key: event.pitch as i16,
        velocity: event.velocity as f64,
    }
}

unsafe extern "C" fn input_events_size(list: *const clap_input_events) -> u32 {
    let list = &*(list as *const InputEventList);
    list.events.len() as u32
}

unsafe extern "C" fn input_events_get(list: *const clap_input_events, index: u32) -> *const clap_event_header {
    let list = &*(list as *const InputEventList);
    match list.events.get(index as usize) {
        Some(event) => &event.header as *const _,
        None => ptr::null(),
    }
}

/// Output event list for a plugin's `process` call. This host does not yet
/// route plugin-originated events anywhere, so every push is rejected
/// rather than silently accepted and dropped.
#[repr(C)]
struct OutputEventList {
    list: clap_output_events,
}

impl OutputEventList {
    fn new() -> Self {
        Self { list: clap_output_events { ctx: ptr::null_mut(), try_push: Some(output_events_reject) } }
    }
}

unsafe extern "C" fn output_events_reject(_list: *const clap_output_events, _event: *const clap_event_header) -> bool {
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initialized,
    Activated,
    Processing,
    Sleeping,
    Deactivated,
    Dead,
}

/// One loaded plugin instance. Owned by the UI thread; the audio thread
/// only ever calls `start_processing`/`process`/`stop_processing` through a
/// reference handed to it via the snapshot (spec §5).
pub struct PluginInstance {
    _library: libloading::Library,
    plugin: *const clap_plugin,
    host: Box<clap_host>,
    bridge: Arc<ThreadPoolBridge>,
    state: State,
    sample_rate: f64,
    max_frames: u32,
    consecutive_errors: u32,
}

// Safety: after `load` returns, the plugin pointer is only touched through
// this type's `&mut self` methods, which the host's threading contract
// (spec §5) restricts to the UI thread for lifecycle calls and the audio
// thread for `start_processing`/`process`/`stop_processing` — never both at
// once. `_library` keeps the dynamic library mapped for the instance's
// lifetime.
unsafe impl Send for PluginInstance {}

const MAX_CONSECUTIVE_ERRORS: u32 = 32;

impl PluginInstance {
    /// Load a plugin from `path`, run it through `init`, and return it in
    /// the `Initialized` state (not yet activated).
    pub fn load(path: &Path, job_pool: Arc<JobPool>, configured_fanout: usize) -> Result<Self> {
        let library = unsafe {
            libloading::Library::new(path)
                .map_err(|e| Error::PluginLoadFailed(format!("opening {}: {e}", path.display())))?
        };

        let entry_fn: libloading::Symbol<unsafe extern "C" fn() -> *const clap_plugin_entry> = unsafe {
            library
                .get(b"clap_entry\0")
                .map_err(|e| Error::PluginLoadFailed(format!("no clap_entry symbol: {e}")))?
        };
        let entry_ptr = unsafe { entry_fn() };
        if entry_ptr.is_null() {
            return Err(Error::PluginLoadFailed("clap_entry returned null".into()));
        }
        let entry = unsafe { &*entry_ptr };

        let path_str = path.to_str().ok_or_else(|| Error::PluginLoadFailed("path is not valid UTF-8".into()))?;
        let path_cstr = CString::new(path_str).map_err(|_| Error::PluginLoadFailed("path contains NUL".into()))?;
        let init_fn = entry.init.ok_or_else(|| Error::PluginLoadFailed("entry has no init".into()))?;
        if !unsafe { init_fn(path_cstr.as_ptr()) } {
            return Err(Error::PluginLoadFailed("entry init returned false".into()));
        }

        let get_factory_fn = entry
            .get_factory
            .ok_or_else(|| Error::PluginLoadFailed("entry has no get_factory".into()))?;
        let factory_ptr = unsafe { get_factory_fn(CLAP_PLUGIN_FACTORY_ID.as_ptr()) };
        if factory_ptr.is_null() {
            return Err(Error::PluginLoadFailed("no plugin factory".into()));
        }
        let factory = unsafe { &*(factory_ptr as *const clap_plugin_factory) };

        let get_count = factory
            .get_plugin_count
            .ok_or_else(|| Error::PluginLoadFailed("factory has no get_plugin_count".into()))?;
        let count = unsafe { get_count(factory_ptr as *const clap_plugin_factory) };
        if count == 0 {
            return Err(Error::PluginLoadFailed("factory exposes no plugins".into()));
        }

        let get_desc = factory
            .get_plugin_descriptor
            .ok_or_else(|| Error::PluginLoadFailed("factory has no get_plugin_descriptor".into()))?;
        let desc_ptr = unsafe { get_desc(factory_ptr as *const clap_plugin_factory, 0) };
        if desc_ptr.is_null() {
            return Err(Error::PluginLoadFailed("null plugin descriptor".into()));
        }
        let descriptor = unsafe { &*desc_ptr };
        let plugin_id = unsafe { CStr::from_ptr(descriptor.id) }.to_owned();

        let bridge = Arc::new(ThreadPoolBridge::new(job_pool, configured_fanout));
        let mut host = Box::new(host::build_host(
            Arc::as_ptr(&bridge) as *mut _,
            c_static("flux"),
            c_static("flux-daw"),
        ));

        let create_fn = factory
            .create_plugin
            .ok_or_else(|| Error::PluginLoadFailed("factory has no create_plugin".into()))?;
        let plugin_ptr = unsafe { create_fn(factory_ptr as *const clap_plugin_factory, &*host, plugin_id.as_ptr()) };
        if plugin_ptr.is_null() {
            return Err(Error::PluginLoadFailed("create_plugin returned null".into()));
        }

        let plugin_ref = unsafe { &*plugin_ptr };
        let plugin_init = plugin_ref.init.ok_or_else(|| Error::PluginLoadFailed("plugin has no init".into()))?;
        if !unsafe { plugin_init(plugin_ptr) } {
            return Err(Error::PluginLoadFailed("plugin init returned false".into()));
        }

        // Extension negotiation (spec §4.D): does this plugin support
        // internal parallel fan-out?
        if let Some(get_ext) = plugin_ref.get_extension {
            let ext_ptr = unsafe { get_ext(plugin_ptr, CLAP_EXT_THREAD_POOL.as_ptr()) };
            if !ext_ptr.is_null() {
                let ext = unsafe { &*(ext_ptr as *const clap_plugin_thread_pool) };
                if let Some(exec) = ext.exec {
                    bridge.bind(plugin_ptr, exec);
                }
            }
        }

        // `host` must stay pinned at a stable address for the plugin's
        // whole lifetime: `host_data` inside it is a raw pointer the plugin
        // may capture.
        let _ = &mut host;

        Ok(Self {
            _library: library,
            plugin: plugin_ptr,
            host,
            bridge,
            state: State::Initialized,
            sample_rate: 48_000.0,
            max_frames: 1024,
            consecutive_errors: 0,
        })
    }

    pub fn bridge(&self) -> &Arc<ThreadPoolBridge> {
        &self.bridge
    }

    /// UI thread only, never while processing (spec §4.D).
    pub fn activate(&mut self, sample_rate: f64, max_frames: u32) -> Result<()> {
        let plugin = unsafe { &*self.plugin };
        let activate = plugin.activate.ok_or_else(|| Error::PluginLoadFailed("no activate".into()))?;
        if !unsafe { activate(self.plugin, sample_rate, 1, max_frames) } {
            return Err(Error::PluginLoadFailed("activate returned false".into()));
        }
        self.sample_rate = sample_rate;
        self.max_frames = max_frames;
        self.state = State::Activated;
        Ok(())
    }

    /// Audio thread only.
    pub fn start_processing(&mut self) -> Result<()> {
        let plugin = unsafe { &*self.plugin };
        let start = plugin.start_processing.ok_or_else(|| Error::PluginLoadFailed("no start_processing".into()))?;
        if !unsafe { start(self.plugin) } {
            return Err(Error::PluginLoadFailed("start_processing returned false".into()));
        }
        self.state = State::Processing;
        Ok(())
    }

    /// Audio thread only. `out_l`/`out_r` must each hold exactly
    /// `frame_count` samples and are zeroed by the caller before this call
    /// (spec §4.D).
    pub fn process(
        &mut self,
        transport: &TransportInfo,
        steady_time: i64,
        frame_count: u32,
        events: &[NoteEvent],
        out_l: &mut [f32],
        out_r: &mut [f32],
    ) -> ProcessStatus {
        if self.state == State::Dead {
            return ProcessStatus::Error;
        }
        if self.state == State::Sleeping {
            // Spec §4.D: skip `process` entirely while sleeping unless an
            // input event arrives; the graph only calls us here when one
            // has, so waking is implicit in being called at all.
            self.state = State::Processing;
        }

        let mut output_ptrs = [out_l.as_mut_ptr(), out_r.as_mut_ptr()];
        let mut clap_out = clap_audio_buffer {
            data32: output_ptrs.as_mut_ptr(),
            data64: ptr::null_mut(),
            channel_count: 2,
            latency: 0,
            constant_mask: 0,
        };
        let clap_transport = clap_event_transport {
            header: clap_event_header { size: 0, time: 0, space_id: 0, type_: 0, flags: 0 },
            flags: 0,
            song_pos_beats: fixed_point(transport.position_beats),
            song_pos_seconds: fixed_point(transport.position_seconds),
            tempo: transport.tempo_bpm,
            tempo_inc: 0.0,
            loop_start_beats: 0,
            loop_end_beats: 0,
            loop_start_seconds: 0,
            loop_end_seconds: 0,
            bar_start: fixed_point(transport.bar_start_beats),
            bar_number: transport.bar_number,
            tsig_num: 4,
            tsig_denom: 4,
        };

        let input_events = InputEventList::new(events);
        let mut output_events = OutputEventList::new();

        let clap_proc = clap_process {
            steady_time,
            frames_count: frame_count,
            transport: &clap_transport,
            audio_inputs: ptr::null(),
            audio_inputs_count: 0,
            audio_outputs: &mut clap_out,
            audio_outputs_count: 1,
            in_events: &input_events.list as *const _ as *const _,
            out_events: &mut output_events.list as *mut _ as *mut _,
        };

        let plugin = unsafe { &*self.plugin };
        let Some(process_fn) = plugin.process else {
            return ProcessStatus::Error;
        };
        let raw = unsafe { process_fn(self.plugin, &clap_proc) };
        let status = ProcessStatus::from_raw(raw);

        match status {
            ProcessStatus::Error => {
                self.consecutive_errors += 1;
                if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    self.state = State::Dead;
                    tracing::warn!("plugin marked dead after {} consecutive process errors", self.consecutive_errors);
                }
            }
            ProcessStatus::Sleep => {
                self.consecutive_errors = 0;
                self.state = State::Sleeping;
            }
            _ => {
                self.consecutive_errors = 0;
            }
        }

        status
    }

    /// Audio thread only; required before `deactivate`.
    pub fn stop_processing(&mut self) {
        let plugin = unsafe { &*self.plugin };
        if let Some(stop) = plugin.stop_processing {
            unsafe { stop(self.plugin) };
        }
        self.state = State::Activated;
    }

    /// UI thread only, after `wait_for_idle()`.
    pub fn deactivate(&mut self) {
        let plugin = unsafe { &*self.plugin };
        if let Some(deactivate) = plugin.deactivate {
            unsafe { deactivate(self.plugin) };
        }
        self.state = State::Deactivated;
    }

    pub fn is_dead(&self) -> bool {
        self.state == State::Dead
    }

    /// True if the plugin returned `sleep` from its last `process` call and
    /// has not yet been woken by a fresh event (spec §4.D/§4.E step 3).
    pub fn is_sleeping(&self) -> bool {
        self.state == State::Sleeping
    }

    /// Force the node out of the sleeping state, e.g. because a UI-thread
    /// request (`request_process`) woke it.
    pub fn wake(&mut self) {
        if self.state == State::Sleeping {
            self.state = State::Processing;
        }
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        let plugin = unsafe { &*self.plugin };
        if let Some(destroy) = plugin.destroy {
            unsafe { destroy(self.plugin) };
        }
    }
}

fn fixed_point(beats: f64) -> i64 {
    // CLAP's `clap_beattime`/`clap_sectime` are Q32.32 fixed point.
    (beats * (1i64 << 32) as f64) as i64
}

fn c_static(s: &'static str) -> &'static CStr {
    // Leak a one-time allocation for a process-lifetime C string; called
    // only at plugin-load time (UI thread), not per block.
    Box::leak(CString::new(s).expect("no interior NUL").into_boxed_c_str())
}
