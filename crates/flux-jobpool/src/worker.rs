//! Worker thread loop, grounded on `tutti-sampler`'s `ButlerThread` spawn
//! pattern (named threads, raised scheduling priority) but waiting on a
//! generation counter instead of a dedicated channel.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thread_priority::ThreadPriority;

use crate::{Shared, IS_WORKER};

pub(crate) fn spawn(index: usize, shared: Arc<Shared>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("flux-jobpool-{index}"))
        .spawn(move || {
            IS_WORKER.with(|w| w.set(true));
            if let Err(err) = thread_priority::set_current_thread_priority(ThreadPriority::Max) {
                tracing::warn!(worker = index, %err, "failed to raise job pool worker priority");
            }
            worker_loop(&shared);
        })
        .expect("failed to spawn job pool worker thread")
}

fn worker_loop(shared: &Shared) {
    let mut last_generation = shared.generation.load(Ordering::Acquire);
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }

        let mut claimed_any = false;
        for slot in shared.slots.iter() {
            if !slot.is_active() {
                continue;
            }
            while let Some(idx) = slot.claim_index() {
                claimed_any = true;
                slot.run(idx);
                if slot.tasks_remaining() == 0 {
                    let _guard = shared.wake_mutex.lock();
                    shared.wake_cv.notify_all();
                }
            }
        }

        if claimed_any {
            continue;
        }

        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }

        let sleep_ns = shared.sleep_ns.load(Ordering::Relaxed).max(1);
        let mut guard = shared.wake_mutex.lock();
        let generation_now = shared.generation.load(Ordering::Acquire);
        if generation_now == last_generation {
            shared.wake_cv.wait_for(&mut guard, Duration::from_nanos(sleep_ns));
        }
        last_generation = shared.generation.load(Ordering::Acquire);
    }
}

/// Called by the submitting thread after activating `slot_idx`: claim
/// indices alongside the workers, then wait for the remainder to drain and
/// release the slot.
pub(crate) fn participate_and_wait(shared: &Shared, slot_idx: usize) {
    let slot = &shared.slots[slot_idx];

    while let Some(idx) = slot.claim_index() {
        slot.run(idx);
    }

    while slot.tasks_remaining() != 0 {
        let mut guard = shared.wake_mutex.lock();
        if slot.tasks_remaining() == 0 {
            break;
        }
        shared.wake_cv.wait_for(&mut guard, Duration::from_micros(50));
    }

    slot.deactivate();
}
