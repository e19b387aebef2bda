//! Plugin thread-pool bridge (spec §4.H): services a plugin's internal
//! `request_exec(num_tasks)` call by fanning the tasks out across the job
//! pool, capped and nesting-aware.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use flux_core::limits::MAX_THREAD_POOL_NESTING;
use flux_jobpool::{current_nesting_depth, current_thread_is_worker, JobPool};

use crate::abi::clap_plugin;

type ExecFn = unsafe extern "C" fn(*const clap_plugin, u32);

/// One bridge per plugin instance, reachable from the plugin's `request_exec`
/// callback via `clap_host::host_data`.
pub struct ThreadPoolBridge {
    job_pool: Arc<JobPool>,
    plugin: Mutex<*const clap_plugin>,
    exec: Mutex<Option<ExecFn>>,
    configured_fanout: usize,
}

// Safety: `plugin`/`exec` are only ever read or replaced behind their
// mutexes; the raw pointer itself is never dereferenced except through the
// plugin's own `exec` callback, which the plugin guarantees is safe to call
// from any audio-class thread (that's the contract of advertising the
// thread_pool extension at all).
unsafe impl Send for ThreadPoolBridge {}
unsafe impl Sync for ThreadPoolBridge {}

impl ThreadPoolBridge {
    pub fn new(job_pool: Arc<JobPool>, configured_fanout: usize) -> Self {
        Self {
            job_pool,
            plugin: Mutex::new(std::ptr::null()),
            exec: Mutex::new(None),
            configured_fanout,
        }
    }

    /// Bind the plugin pointer and its `exec` entry point once the plugin
    /// has advertised `clap_plugin_thread_pool` during init.
    pub(crate) fn bind(&self, plugin: *const clap_plugin, exec: ExecFn) {
        *self.plugin.lock() = plugin;
        *self.exec.lock() = Some(exec);
    }

    /// Service a `request_exec(num_tasks)` call (spec §4.H algorithm).
    /// `_host_data` is accepted for symmetry with the raw ABI callback but
    /// unused: `self` already is the bound bridge instance.
    pub fn request_exec(&self, _host_data: *mut c_void, num_tasks: u32) -> bool {
        let plugin = *self.plugin.lock();
        let exec = *self.exec.lock();
        let Some(exec) = exec else {
            return false;
        };
        if plugin.is_null() {
            return false;
        }

        let n = num_tasks as usize;
        if n == 0 {
            return true;
        }

        let already_worker = current_thread_is_worker();
        if already_worker && current_nesting_depth() >= MAX_THREAD_POOL_NESTING {
            for i in 0..n {
                unsafe { exec(plugin, i as u32) };
            }
            return true;
        }

        let fanout = if already_worker { (self.configured_fanout / 2).max(1) } else { self.configured_fanout };
        let job_count = n.min(fanout.max(1));
        let next_index = AtomicUsize::new(0);

        self.job_pool.submit_batch(job_count, |_worker_slot| loop {
            let idx = next_index.fetch_add(1, Ordering::AcqRel);
            if idx >= n {
                break;
            }
            unsafe { exec(plugin, idx as u32) };
        });

        true
    }
}
