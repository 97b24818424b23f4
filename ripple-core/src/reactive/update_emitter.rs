//! Update Event Emitter
//!
//! The fan-out layer: maps keys to the handlers interested in them and,
//! once per coalescing window, calls exactly the handlers whose keys
//! changed.
//!
//! # Dispatch
//!
//! 1. The coalescer signals `HasChanges` when a window opens.
//! 2. The emitter enqueues one dispatch task onto the shared [`TaskQueue`].
//! 3. When the queue flushes, the task takes the updated keys out of the
//!    coalescer (closing its window under the same lock), resolves the
//!    handlers to call, and calls them with no lock held.
//!
//! Because the coalescer is reset before any handler runs, a handler that
//! writes to the store opens a new window; its changes are delivered by a
//! later flush rather than lost.
//!
//! # Walk Strategy
//!
//! Matching changed keys against subscriptions can walk either side. When
//! the updated set is small relative to the table
//! (`2 × |updated| < |subscribed|`) the updated keys are walked and looked
//! up; otherwise the whole table is walked and each key is tested against
//! the updated set. Both produce the same (key, handler) pairs.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde::Serialize;

use super::coalescer::{CoalescerEventKind, UpdateCoalescer};
use super::emitter::ListenerId;
use super::handler::{Handler, HandlerId};
use crate::schedule::TaskQueue;
use crate::store::Key;

/// Which side of the match a dispatch walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStrategy {
    /// Iterate the updated keys and look each one up in the table.
    UpdatedKeys,
    /// Iterate the table and test each key against the updated set.
    Subscriptions,
}

impl WalkStrategy {
    pub fn choose(updated: usize, subscribed: usize) -> Self {
        if 2 * updated < subscribed {
            WalkStrategy::UpdatedKeys
        } else {
            WalkStrategy::Subscriptions
        }
    }
}

/// Subscription counts, as reported by [`UpdateEmitter::get_metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    /// Keys with at least one handler.
    pub total_keys: usize,
    /// (key, handler) pairs.
    pub total_handlers: usize,
    pub average_handlers_per_key: f64,
    /// Tasks waiting in the shared queue.
    pub queue_length: usize,
}

struct Subscription {
    handler: Handler,
    /// How many subscribe calls are outstanding for this (key, handler).
    refs: usize,
}

/// Key to handlers. A key never maps to an empty entry.
#[derive(Default)]
struct SubscriptionTable {
    by_key: HashMap<Key, IndexMap<HandlerId, Subscription>>,
}

impl SubscriptionTable {
    fn subscribe(&mut self, key: Key, handler: &Handler) {
        self.by_key
            .entry(key)
            .or_default()
            .entry(handler.id())
            .and_modify(|sub| sub.refs += 1)
            .or_insert_with(|| Subscription {
                handler: handler.clone(),
                refs: 1,
            });
    }

    fn unsubscribe(&mut self, key: &Key, id: HandlerId) {
        let Some(handlers) = self.by_key.get_mut(key) else {
            return;
        };
        if let Some(sub) = handlers.get_mut(&id) {
            sub.refs -= 1;
            if sub.refs == 0 {
                handlers.shift_remove(&id);
            }
        }
        if handlers.is_empty() {
            self.by_key.remove(key);
        }
    }

    fn total_handlers(&self) -> usize {
        self.by_key.values().map(IndexMap::len).sum()
    }

    fn matching(&self, updated: &IndexSet<Key>, strategy: WalkStrategy) -> Vec<Handler> {
        let collect = |handlers: &IndexMap<HandlerId, Subscription>, out: &mut Vec<Handler>| {
            out.extend(handlers.values().map(|sub| sub.handler.clone()));
        };

        let mut out = Vec::new();
        match strategy {
            WalkStrategy::UpdatedKeys => {
                for key in updated {
                    if let Some(handlers) = self.by_key.get(key) {
                        collect(handlers, &mut out);
                    }
                }
            }
            WalkStrategy::Subscriptions => {
                for (key, handlers) in &self.by_key {
                    if updated.contains(key) {
                        collect(handlers, &mut out);
                    }
                }
            }
        }
        out
    }
}

struct EmitterInner {
    coalescer: UpdateCoalescer,
    queue: TaskQueue,
    table: Mutex<SubscriptionTable>,
    listener: Mutex<Option<ListenerId>>,
    destroyed: AtomicBool,
}

impl EmitterInner {
    fn dispatch(&self) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }

        let updated = self.coalescer.take_updated_keys();
        let handlers = {
            let table = self.table.lock();
            if table.by_key.is_empty() {
                None
            } else {
                let strategy = WalkStrategy::choose(updated.len(), table.by_key.len());
                tracing::trace!(
                    updated = updated.len(),
                    subscribed = table.by_key.len(),
                    ?strategy,
                    "dispatching updates"
                );
                Some(table.matching(&updated, strategy))
            }
        };

        if let Some(handlers) = handlers {
            tracing::trace!(handlers = handlers.len(), "invoking handlers");
            for handler in handlers {
                handler.call();
            }
        }
    }

    fn detach(&self) {
        if let Some(id) = self.listener.lock().take() {
            self.coalescer
                .emitter()
                .off(CoalescerEventKind::HasChanges, id);
        }
    }
}

impl Drop for EmitterInner {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Per-key fan-out bound to one coalescer and one queue.
///
/// Cloning shares the same subscription table.
#[derive(Clone)]
pub struct UpdateEmitter {
    inner: Arc<EmitterInner>,
}

impl UpdateEmitter {
    pub fn new(coalescer: UpdateCoalescer, queue: TaskQueue) -> Self {
        let inner = Arc::new(EmitterInner {
            coalescer,
            queue,
            table: Mutex::new(SubscriptionTable::default()),
            listener: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });

        let weak: Weak<EmitterInner> = Arc::downgrade(&inner);
        let id = inner
            .coalescer
            .emitter()
            .on(CoalescerEventKind::HasChanges, move |_| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let task_target = Arc::downgrade(&inner);
                inner.queue.enqueue(move || {
                    if let Some(inner) = task_target.upgrade() {
                        inner.dispatch();
                    }
                });
            });
        *inner.listener.lock() = Some(id);

        Self { inner }
    }

    /// Call `handler` whenever `key` changes.
    pub fn subscribe_on_key(&self, key: impl Into<Key>, handler: &Handler) -> Unsubscribe {
        self.subscribe_on_keys([key.into()], handler)
    }

    /// Call `handler` whenever any of `keys` changes.
    ///
    /// Duplicate keys in `keys` count once.
    pub fn subscribe_on_keys<I, K>(&self, keys: I, handler: &Handler) -> Unsubscribe
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let keys: IndexSet<Key> = keys.into_iter().map(Into::into).collect();

        if self.is_destroyed() {
            tracing::warn!("subscription on a destroyed update emitter was ignored");
            return Unsubscribe::noop(handler.id());
        }

        {
            let mut table = self.inner.table.lock();
            for key in &keys {
                table.subscribe(key.clone(), handler);
            }
        }

        Unsubscribe {
            emitter: Arc::downgrade(&self.inner),
            keys: keys.into_iter().collect(),
            handler: handler.id(),
        }
    }

    /// Undo one `subscribe_on_key(key, handler)`.
    pub fn unsubscribe_from_key(&self, key: impl Into<Key>, handler: &Handler) {
        self.inner.table.lock().unsubscribe(&key.into(), handler.id());
    }

    /// Undo one subscription of `handler` on each of `keys`.
    ///
    /// Duplicate keys in `keys` count once.
    pub fn unsubscribe_from_keys<I, K>(&self, keys: I, handler: &Handler)
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let keys: IndexSet<Key> = keys.into_iter().map(Into::into).collect();
        let mut table = self.inner.table.lock();
        for key in &keys {
            table.unsubscribe(key, handler.id());
        }
    }

    pub fn get_metrics(&self) -> Metrics {
        let (total_keys, total_handlers) = {
            let table = self.inner.table.lock();
            (table.by_key.len(), table.total_handlers())
        };

        Metrics {
            total_keys,
            total_handlers,
            average_handlers_per_key: if total_keys == 0 {
                0.0
            } else {
                total_handlers as f64 / total_keys as f64
            },
            queue_length: self.inner.queue.len(),
        }
    }

    pub fn coalescer(&self) -> &UpdateCoalescer {
        &self.inner.coalescer
    }

    /// Drop every subscription, detach from the coalescer and destroy it.
    ///
    /// A dispatch task already sitting in the queue becomes a no-op. Safe
    /// to call repeatedly.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.detach();
        *self.inner.table.lock() = SubscriptionTable::default();
        self.inner.coalescer.destroy();
        tracing::debug!("update emitter destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Handle that does not keep this emitter alive.
    pub fn downgrade(&self) -> WeakUpdateEmitter {
        WeakUpdateEmitter {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning handle to an [`UpdateEmitter`].
///
/// Once every `UpdateEmitter` clone is dropped, the emitter detaches from
/// its coalescer and [`upgrade`](WeakUpdateEmitter::upgrade) returns `None`.
#[derive(Clone)]
pub struct WeakUpdateEmitter {
    inner: Weak<EmitterInner>,
}

impl WeakUpdateEmitter {
    pub fn upgrade(&self) -> Option<UpdateEmitter> {
        self.inner.upgrade().map(|inner| UpdateEmitter { inner })
    }

    /// Whether the emitter is still alive and not destroyed.
    pub fn is_live(&self) -> bool {
        self.upgrade().is_some_and(|emitter| !emitter.is_destroyed())
    }
}

impl fmt::Debug for WeakUpdateEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakUpdateEmitter")
            .field("live", &self.is_live())
            .finish()
    }
}

impl fmt::Debug for UpdateEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateEmitter")
            .field("metrics", &self.get_metrics())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Token returned by the subscribe calls; undoes exactly that subscription.
///
/// Dropping the token leaves the subscription in place.
pub struct Unsubscribe {
    emitter: Weak<EmitterInner>,
    keys: Vec<Key>,
    handler: HandlerId,
}

impl Unsubscribe {
    fn noop(handler: HandlerId) -> Self {
        Self {
            emitter: Weak::new(),
            keys: Vec::new(),
            handler,
        }
    }

    pub fn unsubscribe(self) {
        let Some(inner) = self.emitter.upgrade() else {
            return;
        };
        let mut table = inner.table.lock();
        for key in &self.keys {
            table.unsubscribe(key, self.handler);
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("keys", &self.keys)
            .field("handler", &self.handler)
            .finish()
    }
}
