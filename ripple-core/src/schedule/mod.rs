//! Deferred Execution
//!
//! The queue and the timing policies that decide when it drains.
//!
//! Work flows one way: update emitters enqueue dispatch tasks onto a
//! [`TaskQueue`]; when the queue goes from empty to non-empty it asks its
//! [`Scheduler`] for a flush; the scheduler calls back into the queue at the
//! moment its strategy dictates. A queue without a scheduler is flushed by
//! hand.
//!
//! One queue is normally shared by every collection and index of an
//! application, so all of their notifications drain together.

mod queue;
mod scheduler;
mod frame;

pub use queue::{Task, TaskQueue};
pub use scheduler::{DelayScheduler, FlushFn, ImmediateScheduler, MicrotaskScheduler, Scheduler};
pub use frame::{
    FrameCallback, FrameClock, FrameRequest, FrameSource, RenderFrameScheduler, TokioFrameSource,
    DEFAULT_FRAME_PERIOD,
};
