//! Thread-identity extension exposed to plugins (spec §4.H): `is_main_thread`
//! and `is_audio_thread`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

std::thread_local! {
    static IS_AUDIO_THREAD: std::cell::Cell<bool> = std::cell::Cell::new(false);
}

/// Stashes the UI/main thread's id the first time it's recorded; every
/// later `is_main_thread` check compares against it.
static MAIN_THREAD_ID: AtomicU64 = AtomicU64::new(0);

fn thread_id_as_u64(id: ThreadId) -> u64 {
    // `ThreadId` has no stable numeric representation; hash it into a u64
    // that's stable for the process lifetime, which is all we need for
    // equality comparisons.
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

/// Call once, from the real UI/main thread, during engine startup.
pub fn record_main_thread() {
    MAIN_THREAD_ID.store(thread_id_as_u64(std::thread::current().id()), Ordering::Release);
}

pub fn is_main_thread() -> bool {
    thread_id_as_u64(std::thread::current().id()) == MAIN_THREAD_ID.load(Ordering::Acquire)
}

/// Mark the calling thread as an audio thread for the duration of `f`. Used
/// by the device callback and by job-pool workers while they execute
/// audio-graph tasks.
pub fn with_audio_thread_flag<R>(f: impl FnOnce() -> R) -> R {
    IS_AUDIO_THREAD.with(|flag| flag.set(true));
    let result = f();
    IS_AUDIO_THREAD.with(|flag| flag.set(false));
    result
}

pub fn is_audio_thread() -> bool {
    IS_AUDIO_THREAD.with(|flag| flag.get()) || flux_jobpool::current_thread_is_worker()
}
