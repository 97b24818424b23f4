//! Change Emitter
//!
//! A minimal typed publish/subscribe primitive. Each emitter is keyed by a
//! closed event enum: listeners register for one event *kind* and receive
//! the full event value when an event of that kind is emitted.
//!
//! Emission works on a snapshot of the listener list:
//!
//! - a listener removed during an emit is still called in that round;
//! - a listener added during an emit is not called until the next emit.
//!
//! The internal lock is never held while a listener runs, so listeners may
//! call `on`/`off`/`emit` re-entrantly.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// An event with a closed set of kinds.
pub trait Event: Send + Sync + 'static {
    /// Tag identifying which variant an event is.
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Identifier returned by [`ChangeEmitter::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerFn<E> = dyn Fn(&E) + Send + Sync;

/// Typed synchronous event emitter.
pub struct ChangeEmitter<E: Event> {
    listeners: Mutex<HashMap<E::Kind, Vec<(ListenerId, Arc<ListenerFn<E>>)>>>,
    next_id: AtomicU64,
}

impl<E: Event> ChangeEmitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `listener` for events of `kind`.
    pub fn on<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn off(&self, kind: E::Kind, id: ListenerId) {
        let mut listeners = self.listeners.lock();
        if let Some(list) = listeners.get_mut(&kind) {
            list.retain(|(lid, _)| *lid != id);
            if list.is_empty() {
                listeners.remove(&kind);
            }
        }
    }

    /// Deliver `event` to every listener registered for its kind.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Arc<ListenerFn<E>>> = {
            let listeners = self.listeners.lock();
            match listeners.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, f)| Arc::clone(f)).collect(),
                None => return,
            }
        };

        for listener in snapshot {
            listener(event);
        }
    }

    /// Remove every listener of every kind.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners.lock().get(&kind).map_or(0, Vec::len)
    }
}

impl<E: Event> Default for ChangeEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> Debug for ChangeEmitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.lock();
        f.debug_struct("ChangeEmitter")
            .field("kinds", &listeners.keys().collect::<Vec<_>>())
            .field("listeners", &listeners.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
