use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// One slot in the fixed-size batch ring (spec §4.A). At most one batch is
/// active per slot at a time; `active` is the publish/claim point that makes
/// writing and reading the type-erased task closure sound without a lock.
pub(crate) struct BatchSlot {
    active: AtomicBool,
    task_count: AtomicUsize,
    next_task: AtomicUsize,
    tasks_remaining: AtomicUsize,
    task_fn: UnsafeCell<Option<&'static (dyn Fn(usize) + Sync)>>,
}

// Safety: `task_fn` is only written while winning the `active` CAS below (no
// other thread can observe `active == true` yet) and only read after a
// thread observes `active == true` via an `Acquire` load, and only cleared
// after the submitter observes `tasks_remaining == 0`. No two threads ever
// race on the cell.
unsafe impl Sync for BatchSlot {}

impl BatchSlot {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            task_count: AtomicUsize::new(0),
            next_task: AtomicUsize::new(0),
            tasks_remaining: AtomicUsize::new(0),
            task_fn: UnsafeCell::new(None),
        }
    }

    /// Attempt to claim this slot for a new batch of `task_count` tasks.
    pub fn try_activate(&self, task_count: usize, task_fn: &'static (dyn Fn(usize) + Sync)) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        unsafe {
            *self.task_fn.get() = Some(task_fn);
        }
        self.task_count.store(task_count, Ordering::Relaxed);
        self.next_task.store(0, Ordering::Relaxed);
        self.tasks_remaining.store(task_count, Ordering::Release);
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claim the next unclaimed task index, if any remain.
    pub fn claim_index(&self) -> Option<usize> {
        let count = self.task_count.load(Ordering::Relaxed);
        let idx = self.next_task.fetch_add(1, Ordering::AcqRel);
        (idx < count).then_some(idx)
    }

    /// Run the task at `idx`.
    pub fn run(&self, idx: usize) {
        let task_fn = unsafe { (*self.task_fn.get()).expect("slot active without a task") };
        task_fn(idx);
        self.tasks_remaining.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn tasks_remaining(&self) -> usize {
        self.tasks_remaining.load(Ordering::Acquire)
    }

    /// Release the slot for reuse. Only the original submitter calls this,
    /// after observing `tasks_remaining() == 0`.
    pub fn deactivate(&self) {
        unsafe {
            *self.task_fn.get() = None;
        }
        self.active.store(false, Ordering::Release);
    }
}
