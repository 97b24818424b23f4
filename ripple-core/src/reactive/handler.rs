//! Handler types for key subscriptions.
//!
//! A Handler is a zero-argument callback with a stable identity. Closures
//! cannot be compared, so identity lives in the [`HandlerId`] assigned at
//! construction; clones of a handler share it. "The same handler" always
//! means "a handler with the same id".

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Next id from a process-wide counter; never reused.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A callback registered against one or more keys.
#[derive(Clone)]
pub struct Handler {
    id: HandlerId,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Handler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: HandlerId::new(),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Run the callback.
    pub fn call(&self) {
        (self.callback)();
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn handler_ids_are_unique() {
        let h1 = Handler::new(|| {});
        let h2 = Handler::new(|| {});

        assert_ne!(h1.id(), h2.id());
        assert_ne!(h1, h2);
    }

    #[test]
    fn clones_share_identity() {
        let h1 = Handler::new(|| {});
        let h2 = h1.clone();

        assert_eq!(h1, h2);
    }

    #[test]
    fn call_runs_callback() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let handler = Handler::new(move || {
            called_clone.store(true, Ordering::SeqCst);
        });

        assert!(!called.load(Ordering::SeqCst));
        handler.call();
        assert!(called.load(Ordering::SeqCst));
    }
}
