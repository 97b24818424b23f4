//! Deferred Task Queue
//!
//! An ordered list of zero-argument tasks drained by [`TaskQueue::flush`].
//!
//! # Flush Semantics
//!
//! A flush takes a snapshot of the queue, empties the live queue, and runs
//! the snapshot in insertion order. Tasks enqueued while the snapshot runs
//! land in the (now empty) live queue and wait for the next flush; a task
//! that re-enqueues itself therefore runs once per flush instead of looping
//! forever inside one.
//!
//! # Scheduling
//!
//! A queue may be bound to a [`Scheduler`]. The scheduler is asked to
//! schedule exactly when the live queue goes from empty to non-empty; it is
//! never notified by [`TaskQueue::clear`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::scheduler::{FlushFn, Scheduler};
use crate::error::SchedulerError;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send>;

struct QueueInner {
    tasks: Mutex<Vec<Task>>,
    scheduler: Mutex<Option<Arc<dyn Scheduler>>>,
    destroyed: AtomicBool,
}

/// Shared handle to a deferred task queue.
///
/// Cloning is cheap and every clone refers to the same queue, which is how
/// one queue is shared by many update emitters.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Create a queue with no scheduler: tasks run only on manual `flush()`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                tasks: Mutex::new(Vec::new()),
                scheduler: Mutex::new(None),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a queue bound to the scheduler built by `make`.
    ///
    /// `make` receives the flush callback the scheduler must invoke. If the
    /// scheduler cannot run in the current environment its error is
    /// returned here, at construction time.
    ///
    /// ```rust,ignore
    /// let queue = TaskQueue::with_scheduler(|flush| Ok(ImmediateScheduler::new(flush)))?;
    /// let queue = TaskQueue::with_scheduler(MicrotaskScheduler::new)?;
    /// ```
    pub fn with_scheduler<S, F>(make: F) -> Result<Self, SchedulerError>
    where
        S: Scheduler + 'static,
        F: FnOnce(FlushFn) -> Result<S, SchedulerError>,
    {
        let queue = Self::new();
        let scheduler = make(queue.flush_fn())?;
        *queue.inner.scheduler.lock() = Some(Arc::new(scheduler));
        Ok(queue)
    }

    /// Flush callback holding only a weak reference to this queue.
    fn flush_fn(&self) -> FlushFn {
        let weak: Weak<QueueInner> = Arc::downgrade(&self.inner);
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                TaskQueue { inner }.flush();
            }
        })
    }

    /// Append a task to the tail of the queue.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_destroyed() {
            tracing::warn!("task enqueued on a destroyed queue was dropped");
            return;
        }

        let was_empty = {
            let mut tasks = self.inner.tasks.lock();
            let was_empty = tasks.is_empty();
            tasks.push(Box::new(task));
            was_empty
        };

        if was_empty {
            let scheduler = self.inner.scheduler.lock().clone();
            if let Some(scheduler) = scheduler {
                scheduler.schedule();
            }
        }
    }

    /// Run every task queued at the moment of the call. Returns how many ran.
    pub fn flush(&self) -> usize {
        let batch = std::mem::take(&mut *self.inner.tasks.lock());
        let count = batch.len();
        if count == 0 {
            return 0;
        }

        tracing::trace!(tasks = count, "flushing task queue");
        for task in batch {
            task();
        }
        count
    }

    /// Drop every pending task without running it.
    pub fn clear(&self) {
        self.inner.tasks.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.lock().is_empty()
    }

    /// Cancel the scheduler and drop pending tasks. Safe to call repeatedly.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let scheduler = self.inner.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.cancel();
        }
        self.clear();
        tracing::debug!("task queue destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Whether the bound scheduler has a flush pending.
    pub fn is_scheduled(&self) -> bool {
        self.inner
            .scheduler
            .lock()
            .as_ref()
            .is_some_and(|scheduler| scheduler.is_pending())
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .field("has_scheduler", &self.inner.scheduler.lock().is_some())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ImmediateScheduler;
    use std::sync::atomic::AtomicUsize;

    /// Scheduler that only counts how often it was asked to schedule.
    struct CountingScheduler {
        scheduled: Arc<AtomicUsize>,
        cancelled: Arc<AtomicBool>,
    }

    impl Scheduler for CountingScheduler {
        fn schedule(&self) {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        fn is_pending(&self) -> bool {
            false
        }
    }

    fn log() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn flush_runs_in_insertion_order() {
        let queue = TaskQueue::new();
        let seen = log();

        for name in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            queue.enqueue(move || seen.lock().push(name));
        }
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.flush(), 3);
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn tasks_enqueued_during_flush_wait_for_next_flush() {
        let queue = TaskQueue::new();
        let seen = log();

        let inner_queue = queue.clone();
        let inner_seen = Arc::clone(&seen);
        queue.enqueue(move || {
            inner_seen.lock().push("outer");
            let late = Arc::clone(&inner_seen);
            inner_queue.enqueue(move || late.lock().push("inner"));
        });

        queue.flush();
        assert_eq!(*seen.lock(), vec!["outer"]);
        assert_eq!(queue.len(), 1);

        queue.flush();
        assert_eq!(*seen.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn schedules_only_on_empty_to_non_empty() {
        let scheduled = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let queue = TaskQueue::with_scheduler(|_flush| {
            Ok(CountingScheduler {
                scheduled: Arc::clone(&scheduled),
                cancelled: Arc::clone(&cancelled),
            })
        })
        .unwrap();

        queue.enqueue(|| {});
        queue.enqueue(|| {});
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);

        queue.flush();
        queue.enqueue(|| {});
        assert_eq!(scheduled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_drops_tasks_without_scheduling() {
        let scheduled = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let queue = TaskQueue::with_scheduler(|_flush| {
            Ok(CountingScheduler {
                scheduled: Arc::clone(&scheduled),
                cancelled: Arc::clone(&cancelled),
            })
        })
        .unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        queue.enqueue(move || ran_clone.store(true, Ordering::SeqCst));
        queue.clear();

        assert_eq!(queue.flush(), 0);
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
        assert!(!cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn immediate_scheduler_runs_before_enqueue_returns() {
        let queue = TaskQueue::with_scheduler(|flush| Ok(ImmediateScheduler::new(flush))).unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        let ran_clone = Arc::clone(&ran);
        queue.enqueue(move || ran_clone.store(true, Ordering::SeqCst));

        assert!(ran.load(Ordering::SeqCst));
        assert!(queue.is_empty());
    }

    #[test]
    fn destroy_cancels_and_is_idempotent() {
        let scheduled = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let queue = TaskQueue::with_scheduler(|_flush| {
            Ok(CountingScheduler {
                scheduled: Arc::clone(&scheduled),
                cancelled: Arc::clone(&cancelled),
            })
        })
        .unwrap();

        queue.enqueue(|| {});
        queue.destroy();
        queue.destroy();

        assert!(cancelled.load(Ordering::SeqCst));
        assert!(queue.is_destroyed());
        assert!(queue.is_empty());

        queue.enqueue(|| {});
        assert!(queue.is_empty());
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scheduler_error_surfaces_at_construction() {
        let result = TaskQueue::with_scheduler(|_flush| -> Result<CountingScheduler, _> {
            Err(SchedulerError::RuntimeUnavailable { strategy: "test" })
        });

        assert!(matches!(
            result,
            Err(SchedulerError::RuntimeUnavailable { strategy: "test" })
        ));
    }
}
