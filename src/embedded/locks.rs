use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One in-process critical section per collection.
///
/// Writers to the same collection queue up; writers to different
/// collections proceed independently. Clones share the same sections.
#[derive(Debug, Clone, Default)]
pub struct CollectionLocks {
    sections: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn section(&self, collection: &str) -> Arc<AsyncMutex<()>> {
        let mut sections = self
            .sections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sections
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Waits for the collection's section. Dropping the guard (including by
    /// dropping the future that owns it) releases it.
    pub async fn acquire(&self, collection: &str) -> OwnedMutexGuard<()> {
        self.section(collection).lock_owned().await
    }

    pub fn try_acquire(&self, collection: &str) -> Option<OwnedMutexGuard<()>> {
        self.section(collection).try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_collection_is_exclusive() {
        let locks = CollectionLocks::new();
        let guard = locks.acquire("Product").await;
        assert!(locks.clone().try_acquire("Product").is_none());
        drop(guard);
        assert!(locks.try_acquire("Product").is_some());
    }

    #[tokio::test]
    async fn collections_do_not_block_each_other() {
        let locks = CollectionLocks::new();
        let _product = locks.acquire("Product").await;
        assert!(locks.try_acquire("Order").is_some());
    }
}
