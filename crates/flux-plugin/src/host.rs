//! The host-side `clap_host` vtable this adapter hands each plugin at
//! creation time, including the `thread_check` and `thread_pool` host
//! extensions (spec §4.D extension negotiation, §4.H thread identity).

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

use crate::abi::{
    clap_host, clap_host_thread_check, clap_host_thread_pool, CLAP_EXT_THREAD_CHECK, CLAP_EXT_THREAD_POOL,
    CLAP_VERSION,
};
use crate::bridge::ThreadPoolBridge;
use crate::thread_ident;

static THREAD_CHECK_EXT: clap_host_thread_check = clap_host_thread_check {
    is_main_thread: Some(host_is_main_thread),
    is_audio_thread: Some(host_is_audio_thread),
};

static THREAD_POOL_EXT: clap_host_thread_pool = clap_host_thread_pool {
    request_exec: Some(host_request_exec),
};

unsafe extern "C" fn host_is_main_thread(_host: *const clap_host) -> bool {
    thread_ident::is_main_thread()
}

unsafe extern "C" fn host_is_audio_thread(_host: *const clap_host) -> bool {
    thread_ident::is_audio_thread()
}

/// Called by a plugin (on its own audio-class thread) to request `num_tasks`
/// parallel invocations of its `clap_plugin_thread_pool::exec`. Delegates to
/// the bridge (spec §4.H).
unsafe extern "C" fn host_request_exec(host: *const clap_host, num_tasks: u32) -> bool {
    let bridge = &*((*host).host_data as *const ThreadPoolBridge);
    bridge.request_exec((*host).host_data, num_tasks)
}

unsafe extern "C" fn get_extension(host: *const clap_host, id: *const c_char) -> *const c_void {
    let id = CStr::from_ptr(id);
    if id == CStr::from_bytes_with_nul(CLAP_EXT_THREAD_CHECK.to_bytes_with_nul()).unwrap() {
        (&THREAD_CHECK_EXT as *const clap_host_thread_check).cast()
    } else if id == CStr::from_bytes_with_nul(CLAP_EXT_THREAD_POOL.to_bytes_with_nul()).unwrap() {
        (&THREAD_POOL_EXT as *const clap_host_thread_pool).cast()
    } else {
        let _ = host;
        std::ptr::null()
    }
}

unsafe extern "C" fn request_restart(_host: *const clap_host) {}
unsafe extern "C" fn request_process(_host: *const clap_host) {}
unsafe extern "C" fn request_callback(_host: *const clap_host) {}

/// Build the `clap_host` vtable for one plugin instance. `host_data` must
/// point at that instance's `ThreadPoolBridge` and stay valid for the
/// plugin's whole lifetime.
pub(crate) fn build_host(host_data: *mut c_void, name: &'static CStr, vendor: &'static CStr) -> clap_host {
    const EMPTY: &[u8] = b"\0";
    const VERSION: &[u8] = b"0.1.0\0";
    clap_host {
        clap_version: CLAP_VERSION,
        host_data,
        name: name.as_ptr(),
        vendor: vendor.as_ptr(),
        url: EMPTY.as_ptr().cast(),
        version: VERSION.as_ptr().cast(),
        get_extension: Some(get_extension),
        request_restart: Some(request_restart),
        request_process: Some(request_process),
        request_callback: Some(request_callback),
    }
}
