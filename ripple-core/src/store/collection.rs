//! Entity Collection
//!
//! A [`Collection`] owns one entity per primary key. The key is extracted
//! from each entity by a selector function; by default that is
//! [`HasPrimaryKey::primary_key`], which for JSON values reads the `id`
//! field.
//!
//! Every call that changes stored state publishes exactly one
//! [`StoreEvent::Update`] listing the keys it touched. Events are emitted
//! after the store lock is released, so listeners may read the collection.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use serde_json::Value;

use super::{Change, Key, MemoryStore, Observable, Store, StoreEvent};
use crate::error::InvalidKeyError;
use crate::reactive::ChangeEmitter;

/// Extracts the primary key of an entity. `None` means the entity has none.
pub type PrimaryKeySelector<T> = Arc<dyn Fn(&T) -> Option<Key> + Send + Sync>;

/// Combines an incoming entity with the one already stored under its key.
pub type MergeStrategy<T> = Arc<dyn Fn(T, &T) -> T + Send + Sync>;

/// Entities that know their own primary key.
pub trait HasPrimaryKey {
    fn primary_key(&self) -> Option<Key>;
}

impl HasPrimaryKey for Value {
    /// Reads the `id` field. Strings and integers are valid keys; anything
    /// else (missing, null, float, object) is not.
    fn primary_key(&self) -> Option<Key> {
        match self.get("id")? {
            Value::String(s) => Some(Key::from(s.as_str())),
            Value::Number(n) => n.as_i64().map(Key::Int),
            _ => None,
        }
    }
}

/// Construction options for a [`Collection`].
pub struct CollectionOptions<T> {
    pub select_primary_key: PrimaryKeySelector<T>,
    /// `None` means the incoming entity replaces the stored one.
    pub merge_strategy: Option<MergeStrategy<T>>,
    /// `None` means a fresh [`MemoryStore`].
    pub backing_store: Option<Box<dyn Store<Arc<T>>>>,
    /// When `true`, `clear()` reports every key that was stored. When
    /// `false`, it reports an empty key list meaning "everything".
    pub clear_emits_prior_keys: bool,
}

impl<T> CollectionOptions<T> {
    pub fn with_selector<F>(select_primary_key: F) -> Self
    where
        F: Fn(&T) -> Option<Key> + Send + Sync + 'static,
    {
        Self {
            select_primary_key: Arc::new(select_primary_key),
            merge_strategy: None,
            backing_store: None,
            clear_emits_prior_keys: false,
        }
    }

    pub fn merge_strategy<F>(mut self, merge: F) -> Self
    where
        F: Fn(T, &T) -> T + Send + Sync + 'static,
    {
        self.merge_strategy = Some(Arc::new(merge));
        self
    }

    pub fn backing_store(mut self, store: impl Store<Arc<T>> + 'static) -> Self {
        self.backing_store = Some(Box::new(store));
        self
    }

    pub fn clear_emits_prior_keys(mut self, enabled: bool) -> Self {
        self.clear_emits_prior_keys = enabled;
        self
    }
}

impl<T: HasPrimaryKey + 'static> Default for CollectionOptions<T> {
    fn default() -> Self {
        Self::with_selector(T::primary_key)
    }
}

/// Mutable entity store that publishes a change record per write.
pub struct Collection<T> {
    store: Mutex<Box<dyn Store<Arc<T>>>>,
    select_primary_key: PrimaryKeySelector<T>,
    merge_strategy: Option<MergeStrategy<T>>,
    clear_emits_prior_keys: bool,
    events: Arc<ChangeEmitter<StoreEvent>>,
}

impl<T> Collection<T>
where
    T: Send + Sync + 'static,
{
    /// Create a collection that reads keys through [`HasPrimaryKey`].
    pub fn new() -> Self
    where
        T: HasPrimaryKey,
    {
        Self::with_options(CollectionOptions::default())
    }

    pub fn with_options(options: CollectionOptions<T>) -> Self {
        let store = options
            .backing_store
            .unwrap_or_else(|| Box::new(MemoryStore::new()));

        Self {
            store: Mutex::new(store),
            select_primary_key: options.select_primary_key,
            merge_strategy: options.merge_strategy,
            clear_emits_prior_keys: options.clear_emits_prior_keys,
            events: Arc::new(ChangeEmitter::new()),
        }
    }

    /// Insert or merge one entity and return its primary key.
    pub fn upsert_one(&self, entity: T) -> Result<Key, InvalidKeyError> {
        let key = (self.select_primary_key)(&entity).ok_or_else(InvalidKeyError::single)?;

        {
            let mut store = self.store.lock();
            self.write(&mut **store, key.clone(), entity);
        }

        self.publish(Change::new([key.clone()]));
        Ok(key)
    }

    /// Insert or merge a batch of entities.
    ///
    /// Every key is resolved before anything is written: if one entity has
    /// no key, the call fails and the store is left untouched. A successful
    /// call publishes a single change record for the whole batch.
    pub fn upsert_many(&self, entities: Vec<T>) -> Result<Vec<Key>, InvalidKeyError> {
        let keyed = entities
            .into_iter()
            .enumerate()
            .map(|(position, entity)| {
                (self.select_primary_key)(&entity)
                    .map(|key| (key, entity))
                    .ok_or_else(|| InvalidKeyError::at(position))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if keyed.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<Key> = keyed.iter().map(|(key, _)| key.clone()).collect();
        {
            let mut store = self.store.lock();
            for (key, entity) in keyed {
                self.write(&mut **store, key, entity);
            }
        }

        let changed: IndexSet<Key> = keys.iter().cloned().collect();
        self.publish(Change::new(changed));
        Ok(keys)
    }

    fn write(&self, store: &mut dyn Store<Arc<T>>, key: Key, incoming: T) {
        let value = match (&self.merge_strategy, store.get(&key)) {
            (Some(merge), Some(existing)) => merge(incoming, &existing),
            _ => incoming,
        };
        store.set(key, Arc::new(value));
    }

    pub fn get_one_by_pk(&self, pk: impl Into<Key>) -> Option<Arc<T>> {
        self.store.lock().get(&pk.into())
    }

    /// Entities for the given keys, in request order. Missing keys are skipped.
    pub fn get_many_by_pks<I, K>(&self, pks: I) -> Vec<Arc<T>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let store = self.store.lock();
        pks.into_iter()
            .filter_map(|pk| store.get(&pk.into()))
            .collect()
    }

    pub fn get_all(&self) -> Vec<Arc<T>> {
        self.store
            .lock()
            .entries()
            .into_iter()
            .map(|(_, entity)| entity)
            .collect()
    }

    pub fn pks(&self) -> Vec<Key> {
        self.store.lock().keys()
    }

    pub fn has(&self, pk: impl Into<Key>) -> bool {
        self.store.lock().contains(&pk.into())
    }

    pub fn count(&self) -> usize {
        self.store.lock().count()
    }

    /// Remove one entity. Returns it if it existed; a missing key is a no-op.
    pub fn remove_one(&self, pk: impl Into<Key>) -> Option<Arc<T>> {
        let pk = pk.into();
        let removed = self.store.lock().remove(&pk);
        if removed.is_some() {
            self.publish(Change::new([pk]));
        }
        removed
    }

    /// Remove a batch of entities and return how many existed.
    ///
    /// The change record lists only the keys that were actually present.
    pub fn remove_many<I, K>(&self, pks: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let removed: IndexSet<Key> = {
            let mut store = self.store.lock();
            pks.into_iter()
                .map(Into::into)
                .filter(|pk| store.remove(pk).is_some())
                .collect()
        };

        let count = removed.len();
        if count > 0 {
            self.publish(Change::new(removed));
        }
        count
    }

    /// Remove every entity.
    ///
    /// Clearing an empty collection changes nothing and publishes nothing.
    pub fn clear(&self) {
        let prior = {
            let mut store = self.store.lock();
            if store.count() == 0 {
                return;
            }
            let prior = self.clear_emits_prior_keys.then(|| store.keys());
            store.clear();
            prior
        };

        match prior {
            Some(keys) => self.publish(Change::new(keys)),
            None => self.publish(Change::everything()),
        }
    }

    fn publish(&self, change: Change) {
        tracing::trace!(keys = change.keys.len(), "collection updated");
        self.events.emit(&StoreEvent::Update(change));
    }
}

impl<T> Observable for Collection<T> {
    fn events(&self) -> &Arc<ChangeEmitter<StoreEvent>> {
        &self.events
    }
}

impl<T: HasPrimaryKey + Send + Sync + 'static> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("count", &self.store.lock().count())
            .field("clear_emits_prior_keys", &self.clear_emits_prior_keys)
            .finish()
    }
}
