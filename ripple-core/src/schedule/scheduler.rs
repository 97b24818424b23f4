//! Flush Schedulers
//!
//! A scheduler decides *when* a queue's flush runs once work has been
//! enqueued. Every strategy honors the same contract:
//!
//! - `schedule()` is idempotent: while a flush is pending, further calls are
//!   no-ops (a pending delay is not restarted);
//! - one `schedule()` triggers at most one flush;
//! - `cancel()` before the trigger fires prevents that flush entirely.
//!
//! # Strategies
//!
//! | Strategy                | Flush runs                                   |
//! |-------------------------|----------------------------------------------|
//! | [`ImmediateScheduler`]  | synchronously, before `schedule()` returns   |
//! | [`MicrotaskScheduler`]  | on the next poll of the tokio runtime        |
//! | [`DelayScheduler`]      | once a fixed delay has elapsed               |
//! | [`RenderFrameScheduler`](super::RenderFrameScheduler) | on the next frame of a [`FrameSource`](super::FrameSource) |
//!
//! The deferred strategies run the flush on a tokio task. They need a
//! running runtime when constructed and report
//! [`SchedulerError::RuntimeUnavailable`] otherwise.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::SchedulerError;

/// Callback a scheduler invokes to drain its queue.
pub type FlushFn = Arc<dyn Fn() + Send + Sync>;

/// Timing policy for a queue flush.
pub trait Scheduler: Send + Sync {
    /// Arrange for one flush. No-op while a flush is already pending.
    fn schedule(&self);

    /// Abort a pending flush, if any.
    fn cancel(&self);

    /// Whether a flush is pending.
    fn is_pending(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Immediate
// ----------------------------------------------------------------------------

/// Runs the flush synchronously inside `schedule()`.
///
/// A `schedule()` that arrives while this scheduler's own flush is running
/// (a task enqueuing more work) does not nest: it is folded into another
/// pass of the loop that is already running.
pub struct ImmediateScheduler {
    flush: FlushFn,
    running: AtomicBool,
    rerun: AtomicBool,
}

impl ImmediateScheduler {
    pub fn new(flush: FlushFn) -> Self {
        Self {
            flush,
            running: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
        }
    }
}

/// Clears the running flag even if a task panics.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Scheduler for ImmediateScheduler {
    fn schedule(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            self.rerun.store(true, Ordering::SeqCst);
            return;
        }

        let _guard = RunningGuard(&self.running);
        loop {
            (self.flush)();
            if !self.rerun.swap(false, Ordering::SeqCst) {
                break;
            }
        }
    }

    fn cancel(&self) {
        self.rerun.store(false, Ordering::SeqCst);
    }

    fn is_pending(&self) -> bool {
        self.rerun.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Deferred slot shared by the tokio-backed strategies
// ----------------------------------------------------------------------------

/// At most one pending flush, identified by a token.
///
/// The spawned task only flushes if its token is still the pending one,
/// so a cancelled task that was already running cannot flush.
pub(crate) struct PendingSlot<H> {
    pending: Mutex<Option<(u64, H)>>,
    next_token: AtomicU64,
}

impl<H> PendingSlot<H> {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            next_token: AtomicU64::new(1),
        }
    }

    /// Arm the slot unless something is already pending. `start` receives
    /// the token and returns the handle used to cancel it.
    pub(crate) fn arm(&self, start: impl FnOnce(u64) -> H) -> bool {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return false;
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        *pending = Some((token, start(token)));
        true
    }

    /// Claim the slot for `token`. Returns `false` if it was cancelled or
    /// replaced in the meantime.
    pub(crate) fn fire(&self, token: u64) -> bool {
        let mut pending = self.pending.lock();
        match pending.as_ref() {
            Some((current, _)) if *current == token => {
                *pending = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn disarm(&self) -> Option<H> {
        self.pending.lock().take().map(|(_, handle)| handle)
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.pending.lock().is_some()
    }
}

fn current_runtime(strategy: &'static str) -> Result<Handle, SchedulerError> {
    Handle::try_current().map_err(|_| SchedulerError::RuntimeUnavailable { strategy })
}

/// Spawn a tokio task that waits (optionally), then flushes if still armed.
fn spawn_flush(
    handle: &Handle,
    slot: &Arc<PendingSlot<JoinHandle<()>>>,
    flush: &FlushFn,
    delay: Option<Duration>,
) -> bool {
    slot.arm(|token| {
        let slot = Arc::clone(slot);
        let flush = Arc::clone(flush);
        handle.spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if slot.fire(token) {
                tracing::trace!(token, "deferred flush fired");
                flush();
            }
        })
    })
}

// ----------------------------------------------------------------------------
// Microtask
// ----------------------------------------------------------------------------

/// Flushes once, on the next turn of the tokio runtime.
///
/// Any number of `schedule()` calls made by the same synchronous stretch of
/// code collapse into that single flush.
pub struct MicrotaskScheduler {
    flush: FlushFn,
    handle: Handle,
    slot: Arc<PendingSlot<JoinHandle<()>>>,
}

impl MicrotaskScheduler {
    pub fn new(flush: FlushFn) -> Result<Self, SchedulerError> {
        Ok(Self {
            flush,
            handle: current_runtime("microtask")?,
            slot: Arc::new(PendingSlot::new()),
        })
    }
}

impl Scheduler for MicrotaskScheduler {
    fn schedule(&self) {
        spawn_flush(&self.handle, &self.slot, &self.flush, None);
    }

    fn cancel(&self) {
        if let Some(task) = self.slot.disarm() {
            task.abort();
            tracing::trace!("microtask flush cancelled");
        }
    }

    fn is_pending(&self) -> bool {
        self.slot.is_armed()
    }
}

impl Drop for MicrotaskScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ----------------------------------------------------------------------------
// Delay
// ----------------------------------------------------------------------------

/// Flushes once, a fixed delay after the first `schedule()`.
///
/// Scheduling again while the delay is running does not restart it.
pub struct DelayScheduler {
    flush: FlushFn,
    handle: Handle,
    delay: Duration,
    slot: Arc<PendingSlot<JoinHandle<()>>>,
}

impl DelayScheduler {
    pub fn new(flush: FlushFn, delay: Duration) -> Result<Self, SchedulerError> {
        Ok(Self {
            flush,
            handle: current_runtime("delay")?,
            delay,
            slot: Arc::new(PendingSlot::new()),
        })
    }

    /// Constructor shaped for [`TaskQueue::with_scheduler`](super::TaskQueue::with_scheduler).
    pub fn after(delay: Duration) -> impl FnOnce(FlushFn) -> Result<Self, SchedulerError> {
        move |flush| Self::new(flush, delay)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Scheduler for DelayScheduler {
    fn schedule(&self) {
        if spawn_flush(&self.handle, &self.slot, &self.flush, Some(self.delay)) {
            tracing::trace!(delay_ms = self.delay.as_millis() as u64, "delayed flush armed");
        }
    }

    fn cancel(&self) {
        if let Some(task) = self.slot.disarm() {
            task.abort();
            tracing::trace!("delayed flush cancelled");
        }
    }

    fn is_pending(&self) -> bool {
        self.slot.is_armed()
    }
}

impl Drop for DelayScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
