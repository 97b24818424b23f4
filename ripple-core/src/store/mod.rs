//! Keyed Storage
//!
//! Plain key-value stores and the mutable wrappers that publish change
//! records when they are written.
//!
//! # Layers
//!
//! - [`Store`] is the backend contract: get/set/remove/clear/count over
//!   [`Key`]s. It emits nothing.
//! - [`Collection`] stores one entity per primary key.
//! - [`Index`] stores one bucket of primary keys per index key, either as a
//!   set ([`SetIndex`]) or as an ordered, duplicate-free list
//!   ([`ArrayIndex`]).
//!
//! Both wrappers publish a [`StoreEvent::Update`] through their own
//! [`ChangeEmitter`](crate::reactive::ChangeEmitter) after every call that
//! actually changed stored state.

mod key;
mod memory;
mod collection;
mod index;
pub mod merge;

pub use key::{Change, ChangedKeys, Key};
pub use memory::MemoryStore;
pub use collection::{Collection, CollectionOptions, HasPrimaryKey, MergeStrategy, PrimaryKeySelector};
pub use index::{comparators, ArrayIndex, Bucket, Comparator, Index, IndexOptions, SetIndex};

use std::sync::Arc;

use crate::reactive::{ChangeEmitter, Event};

/// Backend contract for keyed storage.
///
/// Values are returned by clone; wrappers keep large values behind `Arc`
/// so this stays cheap.
pub trait Store<V>: Send + Sync {
    fn get(&self, key: &Key) -> Option<V>;

    /// Write `value` under `key`, returning the previous value.
    fn set(&mut self, key: Key, value: V) -> Option<V>;

    fn remove(&mut self, key: &Key) -> Option<V>;

    fn clear(&mut self);

    fn count(&self) -> usize;

    fn contains(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    fn keys(&self) -> Vec<Key>;

    fn entries(&self) -> Vec<(Key, V)>;
}

/// Events published by store wrappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Stored state changed for the listed keys.
    Update(Change),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreEventKind {
    Update,
}

impl Event for StoreEvent {
    type Kind = StoreEventKind;

    fn kind(&self) -> StoreEventKind {
        match self {
            StoreEvent::Update(_) => StoreEventKind::Update,
        }
    }
}

/// A store wrapper whose writes can be observed.
///
/// Implemented by [`Collection`] and [`Index`]; this is what coalescers
/// attach to.
pub trait Observable {
    fn events(&self) -> &Arc<ChangeEmitter<StoreEvent>>;
}
