//! Work-stealing job pool with adaptive idle sleep (spec §4.A).
//!
//! `submit_batch` schedules `task_count` invocations of a closure across the
//! worker pool and the calling thread, returning only once every index has
//! run. Batches are allocated from a fixed ring of slots so the pool never
//! allocates on the hot path; if the ring is exhausted (nesting too deep)
//! the caller runs every task inline instead (spec §7 `pool_exhausted`).

mod slot;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use flux_core::limits::{MAX_BATCH_SLOTS, MAX_THREAD_POOL_NESTING};
use slot::BatchSlot;

std::thread_local! {
    static NESTING_DEPTH: std::cell::Cell<usize> = std::cell::Cell::new(0);
    static IS_WORKER: std::cell::Cell<bool> = std::cell::Cell::new(false);
}

/// Returns true if the calling thread is one of this pool's worker threads.
/// Used by the plugin thread-pool bridge (spec §4.H) to decide whether to
/// halve the requested fan-out.
pub fn current_thread_is_worker() -> bool {
    IS_WORKER.with(|w| w.get())
}

/// Current plugin-thread-pool / job-pool nesting depth on this thread.
pub fn current_nesting_depth() -> usize {
    NESTING_DEPTH.with(|d| d.get())
}

pub(crate) struct Shared {
    slots: [BatchSlot; MAX_BATCH_SLOTS],
    shutdown: AtomicBool,
    generation: AtomicU64,
    wake_mutex: Mutex<()>,
    wake_cv: Condvar,
    /// Nanosecond idle-sleep bound, tuned by the engine from measured
    /// callback utilization (spec §4.F adaptive sleep table).
    sleep_ns: AtomicU64,
}

impl Shared {
    fn wake_all(&self) {
        self.generation.fetch_add(1, Ordering::Release);
        let _guard = self.wake_mutex.lock();
        self.wake_cv.notify_all();
    }
}

/// A work-stealing pool of worker threads pinned to the audio thread class.
pub struct JobPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl JobPool {
    /// Spawn `num_workers` worker threads. `min_sleep_ns`/`max_sleep_ns` seed
    /// the adaptive sleep bound; the engine retunes it every block via
    /// [`JobPool::set_sleep_ns`].
    pub fn new(num_workers: usize, min_sleep_ns: u64) -> Self {
        let shared = Arc::new(Shared {
            slots: std::array::from_fn(|_| BatchSlot::new()),
            shutdown: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            wake_mutex: Mutex::new(()),
            wake_cv: Condvar::new(),
            sleep_ns: AtomicU64::new(min_sleep_ns),
        });

        let workers = (0..num_workers)
            .map(|i| worker::spawn(i, Arc::clone(&shared)))
            .collect();

        Self { shared, workers }
    }

    /// Atomically update the worker idle-sleep bound (spec §4.A).
    pub fn set_sleep_ns(&self, ns: u64) {
        self.shared.sleep_ns.store(ns, Ordering::Relaxed);
    }

    pub fn sleep_ns(&self) -> u64 {
        self.shared.sleep_ns.load(Ordering::Relaxed)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Schedule `task_count` invocations of `task_fn(index)` and block until
    /// all have completed. The calling thread participates in execution.
    ///
    /// Falls back to fully inline, sequential execution on the caller if no
    /// batch slot can be acquired (nesting too deep) — spec §7
    /// `pool_exhausted`, not user-visible.
    pub fn submit_batch<F>(&self, task_count: usize, task_fn: F)
    where
        F: Fn(usize) + Sync,
    {
        if task_count == 0 {
            return;
        }

        let depth = NESTING_DEPTH.with(|d| d.get());
        if depth >= MAX_THREAD_POOL_NESTING {
            tracing::trace!(task_count, depth, "job pool nesting cap hit, running inline");
            for i in 0..task_count {
                task_fn(i);
            }
            return;
        }

        // Erase the closure's lifetime: sound because this function does not
        // return until every worker has observed the slot's
        // `tasks_remaining` counter reach zero, which happens-before any use
        // of `task_fn` could outlive the call.
        let task_fn_ref: &(dyn Fn(usize) + Sync) = &task_fn;
        let task_fn_static: &'static (dyn Fn(usize) + Sync) =
            unsafe { std::mem::transmute(task_fn_ref) };

        match self.shared.slots.iter().position(|s| s.try_activate(task_count, task_fn_static)) {
            Some(slot_idx) => {
                NESTING_DEPTH.with(|d| d.set(depth + 1));
                self.shared.wake_all();
                worker::participate_and_wait(&self.shared, slot_idx);
                NESTING_DEPTH.with(|d| d.set(depth));
            }
            None => {
                tracing::debug!(task_count, "job pool exhausted (no free slot), running inline");
                for i in 0..task_count {
                    task_fn(i);
                }
            }
        }
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl JobPool {
    /// Apply one step of the adaptive sleep table (spec §4.F) given the last
    /// measured callback usage fraction and the per-block time budget.
    pub fn retune(&self, usage: f64, playing: bool, budget: Duration, min: Duration, max: Duration) {
        let current = Duration::from_nanos(self.sleep_ns());
        let low_threshold = if playing { 0.05 } else { 0.20 };
        let next = if usage >= 0.40 {
            min
        } else if usage >= low_threshold {
            (budget / 10).clamp(min, max)
        } else {
            (current * 2).min(max)
        };
        self.set_sleep_ns(next.as_nanos() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn submit_batch_runs_every_index_exactly_once() {
        let pool = JobPool::new(4, 1_000);
        let counts: Vec<AtomicUsize> = (0..37).map(|_| AtomicUsize::new(0)).collect();
        pool.submit_batch(counts.len(), |i| {
            counts[i].fetch_add(1, Ordering::SeqCst);
        });
        for c in &counts {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn submit_batch_zero_tasks_is_noop() {
        let pool = JobPool::new(2, 1_000);
        pool.submit_batch(0, |_| panic!("should not run"));
    }

    #[test]
    fn nesting_cap_falls_back_to_inline() {
        let pool = JobPool::new(2, 1_000);
        let depth_seen = AtomicUsize::new(0);
        // Recurse past the nesting cap; the innermost call must still run
        // every task (inline), never panicking or deadlocking.
        fn recurse(pool: &JobPool, depth: usize, depth_seen: &AtomicUsize) {
            if depth == 0 {
                return;
            }
            pool.submit_batch(3, |_| {
                depth_seen.fetch_max(depth, Ordering::SeqCst);
                recurse(pool, depth - 1, depth_seen);
            });
        }
        recurse(&pool, MAX_THREAD_POOL_NESTING + 2, &depth_seen);
        assert!(depth_seen.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn retune_follows_adaptive_table() {
        let pool = JobPool::new(1, 1_000);
        let min = Duration::from_nanos(1_000);
        let max = Duration::from_nanos(1_000_000);
        let budget = Duration::from_millis(3);

        pool.set_sleep_ns(min.as_nanos() as u64);
        pool.retune(0.5, true, budget, min, max);
        assert_eq!(pool.sleep_ns(), min.as_nanos() as u64);

        pool.retune(0.1, true, budget, min, max);
        assert_eq!(pool.sleep_ns(), (budget / 10).as_nanos() as u64);

        pool.set_sleep_ns(2_000);
        pool.retune(0.01, true, budget, min, max);
        assert_eq!(pool.sleep_ns(), 4_000);
    }
}
