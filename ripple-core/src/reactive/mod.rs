//! Reactive Propagation
//!
//! This module turns store mutations into handler calls. It sits between the
//! store wrappers (which publish changes) and the task queue (which decides
//! when work runs).
//!
//! # Concepts
//!
//! ## Change Emitters
//!
//! A [`ChangeEmitter`] is a typed publish/subscribe hub. Every store wrapper
//! owns one carrying UPDATE events; every coalescer owns one carrying
//! HAS_CHANGES events.
//!
//! ## Coalescers
//!
//! An [`UpdateCoalescer`] listens to one store wrapper and accumulates the
//! keys it reports. Any number of synchronous writes produce a single
//! HAS_CHANGES signal until the accumulated set is cleared.
//!
//! ## Update Emitters
//!
//! An [`UpdateEmitter`] maps keys to [`Handler`]s. On each HAS_CHANGES it
//! enqueues one dispatch task; when the queue flushes, each handler
//! subscribed to a changed key runs once for that key.
//!
//! # Implementation Notes
//!
//! Nothing here holds a lock while calling user code. Emitters snapshot their
//! listeners, and dispatch snapshots its handlers, before invoking anything,
//! so callbacks are free to write to stores or change subscriptions.
//!
//! Listener closures hold weak references to their owners. Dropping the last
//! handle to a coalescer or update emitter detaches it from its source.

mod emitter;
mod handler;
mod coalescer;
mod update_emitter;

pub use emitter::{ChangeEmitter, Event, ListenerId};
pub use handler::{Handler, HandlerId};
pub use coalescer::{CoalescerEvent, CoalescerEventKind, UpdateCoalescer};
pub use update_emitter::{Metrics, Unsubscribe, UpdateEmitter, WalkStrategy, WeakUpdateEmitter};
