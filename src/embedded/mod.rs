//! Embedded backend: repositories over an in-process [`DocumentStore`].

pub mod locks;
pub mod repository;

pub use locks::CollectionLocks;
pub use repository::{DEFAULT_MAX_ATTEMPTS, EmbeddedRepository};

use crate::audit::Auditor;
use crate::entity::Entity;
use crate::storage::DocumentStore;
use std::sync::Arc;

/// Hands out repositories that share one store and one set of critical
/// sections, so every writer of a collection in this process queues on the
/// same lock.
#[derive(Clone)]
pub struct EmbeddedBackend {
    store: Arc<dyn DocumentStore>,
    locks: CollectionLocks,
    auditor: Auditor,
    max_attempts: usize,
}

impl EmbeddedBackend {
    pub fn new(store: Arc<dyn DocumentStore>, auditor: Auditor) -> Self {
        Self {
            store,
            locks: CollectionLocks::new(),
            auditor,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn repository<T: Entity>(&self) -> EmbeddedRepository<T> {
        EmbeddedRepository::new(self.store.clone(), self.auditor.clone())
            .with_locks(self.locks.clone())
            .with_max_attempts(self.max_attempts)
    }
}

impl std::fmt::Debug for EmbeddedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedBackend")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
