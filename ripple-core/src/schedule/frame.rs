//! Render-Frame Scheduling
//!
//! A [`FrameSource`] delivers "next frame" callbacks, the way a display
//! loop does. [`RenderFrameScheduler`] asks its source for one frame per
//! `schedule()` and flushes when that frame arrives.
//!
//! Two sources are provided:
//!
//! - [`FrameClock`]: driven by the host, which calls [`FrameClock::tick`]
//!   once per rendered frame (a game loop, a terminal UI redraw).
//! - [`TokioFrameSource`]: ticks a [`FrameClock`] on a tokio interval.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::scheduler::{FlushFn, PendingSlot, Scheduler};
use crate::error::SchedulerError;

/// Default frame period of [`TokioFrameSource`] (about 60 frames a second).
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(16);

/// Callback run on the next frame.
pub type FrameCallback = Box<dyn FnOnce() + Send>;

/// Handle to a requested frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequest(u64);

/// Something that can run a callback on its next frame.
pub trait FrameSource: Send + Sync {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequest;

    /// Drop a requested callback before its frame. Unknown requests are ignored.
    fn cancel_frame(&self, request: FrameRequest);
}

// ----------------------------------------------------------------------------
// FrameClock
// ----------------------------------------------------------------------------

/// Host-driven frame source.
///
/// Each [`tick`](FrameClock::tick) runs the callbacks requested before it
/// started; callbacks requested during a tick wait for the next one.
pub struct FrameClock {
    requests: Mutex<IndexMap<u64, FrameCallback>>,
    next_request: AtomicU64,
    frames: AtomicU64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(IndexMap::new()),
            next_request: AtomicU64::new(1),
            frames: AtomicU64::new(0),
        }
    }

    /// Advance one frame. Returns how many callbacks ran.
    pub fn tick(&self) -> usize {
        let due = std::mem::take(&mut *self.requests.lock());
        self.frames.fetch_add(1, Ordering::Relaxed);

        let count = due.len();
        for (_, callback) in due {
            callback();
        }
        count
    }

    /// Frames elapsed so far.
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Callbacks waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for FrameClock {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequest {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().insert(id, callback);
        FrameRequest(id)
    }

    fn cancel_frame(&self, request: FrameRequest) {
        self.requests.lock().shift_remove(&request.0);
    }
}

impl fmt::Debug for FrameClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameClock")
            .field("frames", &self.frame_count())
            .field("pending", &self.pending())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// TokioFrameSource
// ----------------------------------------------------------------------------

/// Frame source ticking on a tokio interval.
///
/// The ticking task stops when the source is dropped.
pub struct TokioFrameSource {
    clock: Arc<FrameClock>,
    period: Duration,
    ticker: JoinHandle<()>,
}

impl TokioFrameSource {
    /// Start ticking every `period` on the current tokio runtime.
    pub fn new(period: Duration) -> Result<Self, SchedulerError> {
        let handle = Handle::try_current().map_err(|_| SchedulerError::RuntimeUnavailable {
            strategy: "render-frame",
        })?;

        let clock = Arc::new(FrameClock::new());
        let weak: Weak<FrameClock> = Arc::downgrade(&clock);
        let ticker = handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(clock) => {
                        clock.tick();
                    }
                    None => break,
                }
            }
        });

        Ok(Self {
            clock,
            period,
            ticker,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn clock(&self) -> &Arc<FrameClock> {
        &self.clock
    }
}

impl FrameSource for TokioFrameSource {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequest {
        self.clock.request_frame(callback)
    }

    fn cancel_frame(&self, request: FrameRequest) {
        self.clock.cancel_frame(request);
    }
}

impl Drop for TokioFrameSource {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

// ----------------------------------------------------------------------------
// RenderFrameScheduler
// ----------------------------------------------------------------------------

/// Flushes once, on the next frame of its [`FrameSource`].
pub struct RenderFrameScheduler {
    flush: FlushFn,
    source: Arc<dyn FrameSource>,
    slot: Arc<PendingSlot<FrameRequest>>,
}

impl RenderFrameScheduler {
    pub fn new(flush: FlushFn, source: Arc<dyn FrameSource>) -> Self {
        Self {
            flush,
            source,
            slot: Arc::new(PendingSlot::new()),
        }
    }

    /// Constructor shaped for [`TaskQueue::with_scheduler`](super::TaskQueue::with_scheduler).
    pub fn on(
        source: Arc<dyn FrameSource>,
    ) -> impl FnOnce(FlushFn) -> Result<Self, SchedulerError> {
        move |flush| Ok(Self::new(flush, source))
    }

    /// Schedule on a [`TokioFrameSource`] ticking every `period`.
    ///
    /// Fails with [`SchedulerError::RuntimeUnavailable`] outside a tokio runtime.
    pub fn on_tokio(flush: FlushFn, period: Duration) -> Result<Self, SchedulerError> {
        let source = TokioFrameSource::new(period)?;
        Ok(Self::new(flush, Arc::new(source)))
    }
}

impl Scheduler for RenderFrameScheduler {
    fn schedule(&self) {
        self.slot.arm(|token| {
            let slot = Arc::clone(&self.slot);
            let flush = Arc::clone(&self.flush);
            self.source.request_frame(Box::new(move || {
                if slot.fire(token) {
                    tracing::trace!(token, "frame flush fired");
                    flush();
                }
            }))
        });
    }

    fn cancel(&self) {
        if let Some(request) = self.slot.disarm() {
            self.source.cancel_frame(request);
            tracing::trace!("frame flush cancelled");
        }
    }

    fn is_pending(&self) -> bool {
        self.slot.is_armed()
    }
}

impl Drop for RenderFrameScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_flush() -> (FlushFn, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let flush: FlushFn = Arc::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (flush, count)
    }

    #[test]
    fn clock_runs_requests_on_tick() {
        let clock = FrameClock::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        clock.request_frame(Box::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let cancelled = clock.request_frame(Box::new(|| panic!("cancelled frame ran")));
        clock.cancel_frame(cancelled);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(clock.tick(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(clock.tick(), 0);
        assert_eq!(clock.frame_count(), 2);
    }

    #[test]
    fn scheduler_flushes_once_per_frame() {
        let clock = Arc::new(FrameClock::new());
        let (flush, count) = counting_flush();
        let scheduler = RenderFrameScheduler::new(flush, clock.clone());

        scheduler.schedule();
        scheduler.schedule();
        assert!(scheduler.is_pending());
        assert_eq!(clock.pending(), 1);

        clock.tick();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending());

        clock.tick();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_withdraws_frame_request() {
        let clock = Arc::new(FrameClock::new());
        let (flush, count) = counting_flush();
        let scheduler = RenderFrameScheduler::new(flush, clock.clone());

        scheduler.schedule();
        scheduler.cancel();
        clock.tick();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn tokio_source_needs_runtime() {
        let (flush, _) = counting_flush();
        assert!(matches!(
            RenderFrameScheduler::on_tokio(flush, DEFAULT_FRAME_PERIOD),
            Err(SchedulerError::RuntimeUnavailable { strategy: "render-frame" })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_source_ticks() {
        let (flush, count) = counting_flush();
        let scheduler = RenderFrameScheduler::on_tokio(flush, Duration::from_millis(16)).unwrap();

        scheduler.schedule();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
