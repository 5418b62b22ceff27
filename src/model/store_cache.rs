use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::errors::RuntimeError;
use crate::model::{LevelId, ProductStore};

/// Memoizes in-flight stores by identifier so independent producers agree.
///
/// The cache holds weak references only: a store stays resident exactly as
/// long as some node or downstream store still owns it. At most one live
/// store exists per identifier at a time; registering a different store
/// under an identifier that is still alive is an error.
pub struct StoreCache {
    entries: Mutex<HashMap<LevelId, Weak<ProductStore>>>,
}

impl StoreCache {
    pub fn new() -> Self {
        StoreCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The live store for `id`, if any.
    pub fn get(&self, id: &LevelId) -> Option<Arc<ProductStore>> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(id).and_then(Weak::upgrade)
    }

    /// Returns the live store for `id`, or inserts the one produced by
    /// `make`. Compare-and-insert on first sight: `make` runs only when no
    /// live store exists.
    pub fn get_or_insert(
        &self,
        id: &LevelId,
        make: impl FnOnce() -> Arc<ProductStore>,
    ) -> Arc<ProductStore> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = entries.get(id).and_then(Weak::upgrade) {
            return existing;
        }
        let store = make();
        entries.insert(id.clone(), Arc::downgrade(&store));
        store
    }

    /// Records `store` as the in-flight store for its identifier.
    ///
    /// Re-registering the same store is a no-op; a different live store
    /// under the same identifier is an error.
    pub fn register(&self, store: &Arc<ProductStore>) -> Result<(), RuntimeError> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = entries.get(store.id()).and_then(Weak::upgrade) {
            if Arc::ptr_eq(&existing, store) {
                return Ok(());
            }
            return Err(RuntimeError::DuplicateStore {
                id: store.id().to_string(),
            });
        }
        entries.insert(store.id().clone(), Arc::downgrade(store));
        Ok(())
    }

    /// Drops entries whose stores are gone.
    pub fn prune(&self) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StoreCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_insert_memoizes_live_stores() {
        let cache = StoreCache::new();
        let job = ProductStore::base("source");
        let id = job.id().clone();

        let first = cache.get_or_insert(&id, || job.clone());
        let second = cache.get_or_insert(&id, || ProductStore::base("other"));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn entries_expire_with_their_stores() {
        let cache = StoreCache::new();
        let id = {
            let job = ProductStore::base("source");
            cache.register(&job).expect("register");
            job.id().clone()
        };
        // The Arc is gone, so the weak entry is dead.
        assert!(cache.get(&id).is_none());

        // A new store may take the identifier over.
        let replacement = ProductStore::base("replay");
        cache.register(&replacement).expect("re-register after expiry");
        assert!(cache.get(&id).is_some());
    }

    #[test]
    fn conflicting_live_registration_is_an_error() {
        let cache = StoreCache::new();
        let a = ProductStore::base("a");
        let b = ProductStore::base("b");

        cache.register(&a).expect("first");
        cache.register(&a).expect("same store again is fine");
        let err = cache.register(&b).unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateStore { .. }));
    }

    #[test]
    fn prune_discards_dead_entries() {
        let cache = StoreCache::new();
        {
            let job = ProductStore::base("source");
            cache.register(&job).expect("register");
        }
        assert_eq!(cache.len(), 1);
        cache.prune();
        assert!(cache.is_empty());
    }
}
