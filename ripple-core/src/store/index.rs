//! Secondary Indexes
//!
//! An [`Index`] maps an index key to a bucket of primary keys. It is a pure
//! lookup structure: it neither owns nor validates the entities those keys
//! refer to, and it lives independently of any [`Collection`](super::Collection).
//!
//! Two bucket shapes are provided:
//!
//! - [`SetIndex`]: each bucket is a `HashSet<Key>`, with no order guarantee.
//! - [`ArrayIndex`]: each bucket is a `Vec<Key>` kept in insertion order and
//!   free of duplicates.
//!
//! Buckets are stored behind `Arc`, so a write that is suppressed by the
//! comparator leaves the stored bucket identical (`Arc::ptr_eq`) to the one
//! readers already hold. Empty buckets are never stored: emptying a bucket
//! deletes it, and that deletion is reported as a change.

use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::{Change, Key, MemoryStore, Observable, Store, StoreEvent};
use crate::reactive::ChangeEmitter;

/// Storage shape of one index bucket.
pub trait Bucket: Clone + Debug + Send + Sync + 'static {
    /// Build a bucket, dropping duplicate keys.
    fn from_pks<I: IntoIterator<Item = Key>>(pks: I) -> Self;

    /// Add `pk`. Returns `false` if it was already present.
    fn insert(&mut self, pk: Key) -> bool;

    /// Remove `pk`. Returns `false` if it was absent.
    fn remove(&mut self, pk: &Key) -> bool;

    fn contains(&self, pk: &Key) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter(&self) -> impl Iterator<Item = &Key>;
}

impl Bucket for HashSet<Key> {
    fn from_pks<I: IntoIterator<Item = Key>>(pks: I) -> Self {
        pks.into_iter().collect()
    }

    fn insert(&mut self, pk: Key) -> bool {
        HashSet::insert(self, pk)
    }

    fn remove(&mut self, pk: &Key) -> bool {
        HashSet::remove(self, pk)
    }

    fn contains(&self, pk: &Key) -> bool {
        HashSet::contains(self, pk)
    }

    fn len(&self) -> usize {
        HashSet::len(self)
    }

    fn iter(&self) -> impl Iterator<Item = &Key> {
        HashSet::iter(self)
    }
}

impl Bucket for Vec<Key> {
    fn from_pks<I: IntoIterator<Item = Key>>(pks: I) -> Self {
        let unique: IndexSet<Key> = pks.into_iter().collect();
        unique.into_iter().collect()
    }

    fn insert(&mut self, pk: Key) -> bool {
        if self.as_slice().contains(&pk) {
            return false;
        }
        self.push(pk);
        true
    }

    fn remove(&mut self, pk: &Key) -> bool {
        match self.as_slice().iter().position(|k| k == pk) {
            Some(at) => {
                Vec::remove(self, at);
                true
            }
            None => false,
        }
    }

    fn contains(&self, pk: &Key) -> bool {
        self.as_slice().contains(pk)
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn iter(&self) -> impl Iterator<Item = &Key> {
        self.as_slice().iter()
    }
}

/// Decides whether two bucket contents are equivalent.
///
/// Returning `true` means "no change": the write is skipped and nothing is
/// published.
pub type Comparator<B> = Arc<dyn Fn(&B, &B) -> bool + Send + Sync>;

/// Stock comparators.
pub mod comparators {
    use std::sync::Arc;

    use super::{Bucket, Comparator};

    /// Equivalent when both buckets list the same keys in the same order.
    pub fn ordered<B: Bucket>() -> Comparator<B> {
        Arc::new(|old: &B, new: &B| old.len() == new.len() && old.iter().eq(new.iter()))
    }

    /// Equivalent when both buckets hold the same keys, in any order.
    pub fn unordered<B: Bucket>() -> Comparator<B> {
        Arc::new(|old: &B, new: &B| old.len() == new.len() && new.iter().all(|pk| old.contains(pk)))
    }

    /// Never equivalent: every `set_pks` writes and publishes.
    pub fn always_changed<B: Bucket>() -> Comparator<B> {
        Arc::new(|_: &B, _: &B| false)
    }
}

/// Construction options for an [`Index`].
pub struct IndexOptions<B> {
    /// Applied by [`Index::set_pks`]. `None` means every set is a write.
    pub comparator: Option<Comparator<B>>,
    /// `None` means a fresh [`MemoryStore`].
    pub backing_store: Option<Box<dyn Store<Arc<B>>>>,
}

impl<B: Bucket> IndexOptions<B> {
    pub fn comparator(mut self, comparator: Comparator<B>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn backing_store(mut self, store: impl Store<Arc<B>> + 'static) -> Self {
        self.backing_store = Some(Box::new(store));
        self
    }
}

impl<B> Default for IndexOptions<B> {
    fn default() -> Self {
        Self {
            comparator: None,
            backing_store: None,
        }
    }
}

/// Index key to bucket-of-primary-keys store.
pub struct Index<B: Bucket> {
    store: Mutex<Box<dyn Store<Arc<B>>>>,
    comparator: Option<Comparator<B>>,
    events: Arc<ChangeEmitter<StoreEvent>>,
}

/// Index whose buckets are unordered sets.
pub type SetIndex = Index<HashSet<Key>>;

/// Index whose buckets are ordered, duplicate-free lists.
pub type ArrayIndex = Index<Vec<Key>>;

impl<B: Bucket> Index<B> {
    pub fn new() -> Self {
        Self::with_options(IndexOptions::default())
    }

    pub fn with_options(options: IndexOptions<B>) -> Self {
        let store = options
            .backing_store
            .unwrap_or_else(|| Box::new(MemoryStore::new()));

        Self {
            store: Mutex::new(store),
            comparator: options.comparator,
            events: Arc::new(ChangeEmitter::new()),
        }
    }

    /// Replace the bucket under `key`, using the index's comparator.
    ///
    /// Setting an empty list deletes the bucket.
    pub fn set_pks<I, K>(&self, key: impl Into<Key>, pks: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let comparator = self.comparator.clone();
        self.replace_bucket(key.into(), pks, comparator.as_ref());
    }

    /// Replace the bucket under `key`, using `comparator` for this call only.
    pub fn set_pks_with<I, K>(&self, key: impl Into<Key>, pks: I, comparator: &Comparator<B>)
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        self.replace_bucket(key.into(), pks, Some(comparator));
    }

    fn replace_bucket<I, K>(&self, key: Key, pks: I, comparator: Option<&Comparator<B>>)
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let bucket = B::from_pks(pks.into_iter().map(Into::into));

        let changed = {
            let mut store = self.store.lock();
            let existing = store.get(&key);

            if bucket.is_empty() {
                store.remove(&key).is_some()
            } else {
                let unchanged = matches!(
                    (&existing, comparator),
                    (Some(old), Some(same)) if same(&**old, &bucket)
                );
                if !unchanged {
                    store.set(key.clone(), Arc::new(bucket));
                }
                !unchanged
            }
        };

        if changed {
            self.publish(Change::new([key]));
        }
    }

    /// Add primary keys to the bucket under `key`, creating it if needed.
    pub fn add_pks<I, K>(&self, key: impl Into<Key>, pks: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let key = key.into();
        let changed = {
            let mut store = self.store.lock();
            let mut bucket = store
                .get(&key)
                .map(|b| (*b).clone())
                .unwrap_or_else(|| B::from_pks(std::iter::empty()));

            let mut added = false;
            for pk in pks {
                added |= bucket.insert(pk.into());
            }
            if added {
                store.set(key.clone(), Arc::new(bucket));
            }
            added
        };

        if changed {
            self.publish(Change::new([key]));
        }
    }

    /// Remove primary keys from the bucket under `key`.
    pub fn remove_pks<I, K>(&self, key: impl Into<Key>, pks: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let key = key.into();
        let pks: Vec<Key> = pks.into_iter().map(Into::into).collect();

        let changed = {
            let mut store = self.store.lock();
            match store.get(&key) {
                Some(bucket) => Self::strip(&mut **store, key.clone(), &bucket, &pks),
                None => false,
            }
        };

        if changed {
            self.publish(Change::new([key]));
        }
    }

    /// Remove primary keys from every bucket that holds them.
    ///
    /// Publishes one change listing every bucket that was modified or
    /// deleted.
    pub fn remove_pks_everywhere<I, K>(&self, pks: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let pks: Vec<Key> = pks.into_iter().map(Into::into).collect();
        if pks.is_empty() {
            return;
        }

        let changed: Vec<Key> = {
            let mut store = self.store.lock();
            store
                .entries()
                .into_iter()
                .filter(|(key, bucket)| Self::strip(&mut **store, key.clone(), bucket, &pks))
                .map(|(key, _)| key)
                .collect()
        };

        if !changed.is_empty() {
            self.publish(Change::new(changed));
        }
    }

    /// Write `bucket` minus `pks` back under `key`, deleting it if emptied.
    /// Returns whether anything was removed.
    fn strip(store: &mut dyn Store<Arc<B>>, key: Key, bucket: &B, pks: &[Key]) -> bool {
        if !pks.iter().any(|pk| bucket.contains(pk)) {
            return false;
        }

        let mut remaining = bucket.clone();
        for pk in pks {
            remaining.remove(pk);
        }

        if remaining.is_empty() {
            store.remove(&key);
        } else {
            store.set(key, Arc::new(remaining));
        }
        true
    }

    /// Delete the bucket under `key`.
    pub fn remove(&self, key: impl Into<Key>) -> Option<Arc<B>> {
        let key = key.into();
        let removed = self.store.lock().remove(&key);
        if removed.is_some() {
            self.publish(Change::new([key]));
        }
        removed
    }

    /// Delete several buckets; returns how many existed.
    pub fn remove_many<I, K>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let removed: IndexSet<Key> = {
            let mut store = self.store.lock();
            keys.into_iter()
                .map(Into::into)
                .filter(|key| store.remove(key).is_some())
                .collect()
        };

        let count = removed.len();
        if count > 0 {
            self.publish(Change::new(removed));
        }
        count
    }

    pub fn get_pks_by_key(&self, key: impl Into<Key>) -> Option<Arc<B>> {
        self.store.lock().get(&key.into())
    }

    /// Buckets for the given keys, in request order. Missing keys are skipped.
    pub fn get_pks_by_keys<I, K>(&self, keys: I) -> Vec<(Key, Arc<B>)>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let store = self.store.lock();
        keys.into_iter()
            .map(Into::into)
            .filter_map(|key| store.get(&key).map(|bucket| (key, bucket)))
            .collect()
    }

    pub fn get_all(&self) -> Vec<(Key, Arc<B>)> {
        self.store.lock().entries()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.store.lock().keys()
    }

    pub fn has(&self, key: impl Into<Key>) -> bool {
        self.store.lock().contains(&key.into())
    }

    /// Number of non-empty buckets.
    pub fn count(&self) -> usize {
        self.store.lock().count()
    }

    /// Delete every bucket, reporting each prior index key.
    pub fn clear(&self) {
        let prior = {
            let mut store = self.store.lock();
            let prior = store.keys();
            store.clear();
            prior
        };

        if !prior.is_empty() {
            self.publish(Change::new(prior));
        }
    }

    fn publish(&self, change: Change) {
        tracing::trace!(keys = change.keys.len(), "index updated");
        self.events.emit(&StoreEvent::Update(change));
    }
}

impl<B: Bucket> Observable for Index<B> {
    fn events(&self) -> &Arc<ChangeEmitter<StoreEvent>> {
        &self.events
    }
}

impl<B: Bucket> Default for Index<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Bucket> fmt::Debug for Index<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("count", &self.count())
            .field("has_comparator", &self.comparator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreEventKind;

    fn record_changes<B: Bucket>(index: &Index<B>) -> Arc<Mutex<Vec<Vec<Key>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        index.events().on(StoreEventKind::Update, move |event| {
            let StoreEvent::Update(change) = event;
            seen_clone.lock().push(change.keys.to_vec());
        });
        seen
    }

    fn keys(raw: &[&str]) -> Vec<Key> {
        raw.iter().map(|k| Key::from(*k)).collect()
    }

    #[test]
    fn array_index_preserves_order() {
        let index = ArrayIndex::new();
        index.set_pks("tag", ["c", "a", "b"]);

        assert_eq!(*index.get_pks_by_key("tag").unwrap(), keys(&["c", "a", "b"]));
    }

    #[test]
    fn array_index_drops_duplicates() {
        let index = ArrayIndex::new();
        index.set_pks("tag", ["a", "b", "a"]);
        index.add_pks("tag", ["b", "c"]);

        assert_eq!(*index.get_pks_by_key("tag").unwrap(), keys(&["a", "b", "c"]));
    }

    #[test]
    fn set_index_holds_exact_members() {
        let index = SetIndex::new();
        index.set_pks("tag", ["a", "b", "c"]);

        let bucket = index.get_pks_by_key("tag").unwrap();
        let expected: HashSet<Key> = keys(&["a", "b", "c"]).into_iter().collect();
        assert_eq!(*bucket, expected);
    }

    #[test]
    fn unordered_comparator_suppresses_reordered_write() {
        let index = ArrayIndex::with_options(
            IndexOptions::default().comparator(comparators::unordered()),
        );
        let seen = record_changes(&index);

        index.set_pks("k", [1, 2]);
        let before = index.get_pks_by_key("k").unwrap();

        index.set_pks("k", [2, 1]);
        let after = index.get_pks_by_key("k").unwrap();

        assert_eq!(seen.lock().len(), 1);
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn ordered_comparator_detects_reorder() {
        let index = ArrayIndex::with_options(
            IndexOptions::default().comparator(comparators::ordered()),
        );
        let seen = record_changes(&index);

        index.set_pks("k", [1, 2]);
        index.set_pks("k", [1, 2]);
        index.set_pks("k", [2, 1]);

        assert_eq!(seen.lock().len(), 2);
        assert_eq!(*index.get_pks_by_key("k").unwrap(), vec![Key::from(2), Key::from(1)]);
    }

    #[test]
    fn always_changed_comparator_writes_every_time() {
        let index = SetIndex::new();
        let seen = record_changes(&index);
        let always = comparators::always_changed();

        index.set_pks_with("k", ["a"], &always);
        index.set_pks_with("k", ["a"], &always);

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn emptied_bucket_is_deleted_and_reported() {
        let index = ArrayIndex::new();
        index.set_pks("k", ["a", "b"]);
        let seen = record_changes(&index);

        index.remove_pks("k", ["a"]);
        index.remove_pks("k", ["b"]);
        index.remove_pks("k", ["b"]);

        assert!(!index.has("k"));
        assert_eq!(index.count(), 0);
        assert_eq!(*seen.lock(), vec![keys(&["k"]), keys(&["k"])]);
    }

    #[test]
    fn array_bucket_removal_keeps_remaining_order() {
        let mut bucket = <Vec<Key> as Bucket>::from_pks(keys(&["a", "b", "c"]));

        assert!(Bucket::remove(&mut bucket, &Key::from("b")));
        assert!(!Bucket::remove(&mut bucket, &Key::from("missing")));
        assert_eq!(bucket, keys(&["a", "c"]));

        let index = ArrayIndex::new();
        index.set_pks("k", ["a", "b", "c"]);
        index.remove_pks("k", ["a"]);
        assert_eq!(*index.get_pks_by_key("k").unwrap(), keys(&["b", "c"]));
    }

    #[test]
    fn setting_empty_list_deletes_bucket() {
        let index = SetIndex::new();
        let seen = record_changes(&index);

        index.set_pks("k", Vec::<Key>::new());
        index.set_pks("k", ["a"]);
        index.set_pks("k", Vec::<Key>::new());

        assert!(index.get_pks_by_key("k").is_none());
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn add_existing_pk_is_silent() {
        let index = SetIndex::new();
        index.add_pks("k", ["a"]);
        let seen = record_changes(&index);

        index.add_pks("k", ["a"]);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn remove_everywhere_reports_touched_buckets_once() {
        let index = ArrayIndex::new();
        index.set_pks("red", ["a", "b"]);
        index.set_pks("blue", ["a"]);
        index.set_pks("green", ["c"]);
        let seen = record_changes(&index);

        index.remove_pks_everywhere(["a"]);

        assert_eq!(*seen.lock(), vec![keys(&["red", "blue"])]);
        assert!(!index.has("blue"));
        assert_eq!(*index.get_pks_by_key("red").unwrap(), keys(&["b"]));
    }

    #[test]
    fn clear_reports_prior_keys() {
        let index = SetIndex::new();
        index.set_pks("x", ["1"]);
        index.set_pks("y", ["2"]);
        let seen = record_changes(&index);

        index.clear();
        index.clear();

        assert_eq!(*seen.lock(), vec![keys(&["x", "y"])]);
    }

    #[test]
    fn lookups_by_many_keys() {
        let index = ArrayIndex::new();
        index.set_pks("x", ["1"]);
        index.set_pks("y", ["2"]);

        let found: Vec<Key> = index
            .get_pks_by_keys(["y", "missing", "x"])
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(found, keys(&["y", "x"]));
        assert_eq!(index.remove_many(["x", "missing"]), 1);
        assert_eq!(index.keys(), keys(&["y"]));
    }
}
