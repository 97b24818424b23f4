//! Update Coalescer
//!
//! Turns any number of synchronous writes into a single downstream signal.
//!
//! # State Machine
//!
//! ```text
//!          UPDATE (pending window closed)
//!   Idle ──────────────────────────────▶ Signaled
//!    ▲                                       │
//!    └──────────── clear_updated_keys ───────┘
//! ```
//!
//! Every UPDATE adds its keys to the pending set. Only the UPDATE that opens
//! a window emits [`CoalescerEvent::HasChanges`]; later UPDATEs inside the
//! same window are recorded silently. The pending set only shrinks through
//! [`UpdateCoalescer::clear_updated_keys`].

use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::emitter::{ChangeEmitter, Event, ListenerId};
use crate::store::{Key, Observable, StoreEvent, StoreEventKind};

/// Events published by an [`UpdateCoalescer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalescerEvent {
    /// A new accumulation window opened.
    HasChanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoalescerEventKind {
    HasChanges,
}

impl Event for CoalescerEvent {
    type Kind = CoalescerEventKind;

    fn kind(&self) -> CoalescerEventKind {
        match self {
            CoalescerEvent::HasChanges => CoalescerEventKind::HasChanges,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowState {
    Idle,
    Signaled,
}

struct Window {
    state: WindowState,
    keys: IndexSet<Key>,
}

struct CoalescerInner {
    source: Arc<ChangeEmitter<StoreEvent>>,
    listener: Mutex<Option<ListenerId>>,
    window: Mutex<Window>,
    emitter: Arc<ChangeEmitter<CoalescerEvent>>,
}

impl CoalescerInner {
    fn record(&self, keys: &[Key]) {
        let opened = {
            let mut window = self.window.lock();
            window.keys.extend(keys.iter().cloned());
            let opened = window.state == WindowState::Idle;
            window.state = WindowState::Signaled;
            opened
        };

        if opened {
            tracing::trace!(keys = keys.len(), "coalescing window opened");
            self.emitter.emit(&CoalescerEvent::HasChanges);
        }
    }

    fn detach(&self) -> bool {
        match self.listener.lock().take() {
            Some(id) => {
                self.source.off(StoreEventKind::Update, id);
                true
            }
            None => false,
        }
    }
}

impl Drop for CoalescerInner {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Accumulates changed keys from one store wrapper.
///
/// Cloning shares the same pending set.
#[derive(Clone)]
pub struct UpdateCoalescer {
    inner: Arc<CoalescerInner>,
}

impl UpdateCoalescer {
    /// Attach to a collection or index.
    pub fn new(source: &impl Observable) -> Self {
        Self::from_emitter(Arc::clone(source.events()))
    }

    /// Attach directly to a store wrapper's change emitter.
    pub fn from_emitter(source: Arc<ChangeEmitter<StoreEvent>>) -> Self {
        let inner = Arc::new(CoalescerInner {
            source,
            listener: Mutex::new(None),
            window: Mutex::new(Window {
                state: WindowState::Idle,
                keys: IndexSet::new(),
            }),
            emitter: Arc::new(ChangeEmitter::new()),
        });

        let weak: Weak<CoalescerInner> = Arc::downgrade(&inner);
        let id = inner.source.on(StoreEventKind::Update, move |event| {
            let StoreEvent::Update(change) = event;
            if let Some(inner) = weak.upgrade() {
                inner.record(&change.keys);
            }
        });
        *inner.listener.lock() = Some(id);

        Self { inner }
    }

    /// Keys changed since the last clear, deduplicated, in first-touch order.
    pub fn get_updated_keys(&self) -> IndexSet<Key> {
        self.inner.window.lock().keys.clone()
    }

    /// Forget pending keys and close the window.
    pub fn clear_updated_keys(&self) {
        let mut window = self.inner.window.lock();
        window.keys.clear();
        window.state = WindowState::Idle;
    }

    /// Return the pending keys and close the window in one step.
    ///
    /// A write racing with this call lands either in the returned set or in
    /// the next window, never in neither.
    pub fn take_updated_keys(&self) -> IndexSet<Key> {
        let mut window = self.inner.window.lock();
        window.state = WindowState::Idle;
        std::mem::take(&mut window.keys)
    }

    /// Whether a window is open (a signal was sent and not yet cleared).
    pub fn is_signaled(&self) -> bool {
        self.inner.window.lock().state == WindowState::Signaled
    }

    /// Emitter carrying [`CoalescerEvent::HasChanges`].
    pub fn emitter(&self) -> &Arc<ChangeEmitter<CoalescerEvent>> {
        &self.inner.emitter
    }

    /// Detach from the source and drop all state. Safe to call repeatedly.
    pub fn destroy(&self) {
        if self.inner.detach() {
            tracing::debug!("coalescer destroyed");
        }
        self.inner.emitter.clear();
        self.clear_updated_keys();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.listener.lock().is_none()
    }
}

impl std::fmt::Debug for UpdateCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let window = self.inner.window.lock();
        f.debug_struct("UpdateCoalescer")
            .field("state", &window.state)
            .field("pending", &window.keys.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Collection, SetIndex};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn count_signals(coalescer: &UpdateCoalescer) -> Arc<AtomicUsize> {
        let signals = Arc::new(AtomicUsize::new(0));
        let signals_clone = Arc::clone(&signals);
        coalescer
            .emitter()
            .on(CoalescerEventKind::HasChanges, move |_| {
                signals_clone.fetch_add(1, Ordering::SeqCst);
            });
        signals
    }

    #[test]
    fn many_writes_one_signal() {
        let users = Collection::<Value>::new();
        let coalescer = UpdateCoalescer::new(&users);
        let signals = count_signals(&coalescer);

        users.upsert_one(json!({"id": "a"})).unwrap();
        users.upsert_one(json!({"id": "b"})).unwrap();
        users
            .upsert_many(vec![json!({"id": "a"}), json!({"id": "c"})])
            .unwrap();
        users.remove_one("b");

        assert_eq!(signals.load(Ordering::SeqCst), 1);
        let keys: Vec<Key> = coalescer.get_updated_keys().into_iter().collect();
        assert_eq!(keys, vec![Key::from("a"), Key::from("b"), Key::from("c")]);
    }

    #[test]
    fn clear_reopens_window() {
        let index = SetIndex::new();
        let coalescer = UpdateCoalescer::new(&index);
        let signals = count_signals(&coalescer);

        index.set_pks("x", ["1"]);
        assert!(coalescer.is_signaled());

        coalescer.clear_updated_keys();
        assert!(!coalescer.is_signaled());
        assert!(coalescer.get_updated_keys().is_empty());

        index.set_pks("y", ["1"]);
        assert_eq!(signals.load(Ordering::SeqCst), 2);
        assert_eq!(coalescer.get_updated_keys().len(), 1);
    }

    #[test]
    fn take_returns_keys_and_reopens_window() {
        let users = Collection::<Value>::new();
        let coalescer = UpdateCoalescer::new(&users);
        let signals = count_signals(&coalescer);

        users.upsert_one(json!({"id": "a"})).unwrap();
        users.upsert_one(json!({"id": "b"})).unwrap();

        let taken: Vec<Key> = coalescer.take_updated_keys().into_iter().collect();
        assert_eq!(taken, vec![Key::from("a"), Key::from("b")]);
        assert!(!coalescer.is_signaled());
        assert!(coalescer.get_updated_keys().is_empty());

        users.upsert_one(json!({"id": "c"})).unwrap();
        assert_eq!(signals.load(Ordering::SeqCst), 2);
        let taken: Vec<Key> = coalescer.take_updated_keys().into_iter().collect();
        assert_eq!(taken, vec![Key::from("c")]);
    }

    #[test]
    fn writes_racing_with_take_are_never_lost() {
        let users = Arc::new(Collection::<Value>::new());
        let coalescer = UpdateCoalescer::new(&*users);

        let writer_users = Arc::clone(&users);
        let writer = std::thread::spawn(move || {
            for id in 0..2_000i64 {
                writer_users.upsert_one(json!({"id": id})).unwrap();
            }
        });

        let mut seen = std::collections::HashSet::new();
        while !writer.is_finished() {
            seen.extend(coalescer.take_updated_keys());
        }
        writer.join().unwrap();
        seen.extend(coalescer.take_updated_keys());

        assert_eq!(seen.len(), 2_000);
    }

    #[test]
    fn empty_change_still_opens_window() {
        let users = Collection::<Value>::new();
        users.upsert_one(json!({"id": "a"})).unwrap();
        let coalescer = UpdateCoalescer::new(&users);
        let signals = count_signals(&coalescer);

        users.clear();

        assert_eq!(signals.load(Ordering::SeqCst), 1);
        assert!(coalescer.get_updated_keys().is_empty());
    }

    #[test]
    fn destroy_detaches_and_is_idempotent() {
        let users = Collection::<Value>::new();
        let coalescer = UpdateCoalescer::new(&users);
        assert_eq!(users.events().listener_count(StoreEventKind::Update), 1);

        coalescer.destroy();
        coalescer.destroy();

        assert!(coalescer.is_destroyed());
        assert_eq!(users.events().listener_count(StoreEventKind::Update), 0);

        users.upsert_one(json!({"id": "a"})).unwrap();
        assert!(coalescer.get_updated_keys().is_empty());
    }

    #[test]
    fn dropping_coalescer_detaches() {
        let users = Collection::<Value>::new();
        drop(UpdateCoalescer::new(&users));

        assert_eq!(users.events().listener_count(StoreEventKind::Update), 0);
    }
}
