use super::locks::CollectionLocks;
use crate::audit::{AuditStamp, Auditor};
use crate::core::{RepoError, Result, cancellable};
use crate::document::apply_instructions;
use crate::entity::{Entity, document_id, from_document, to_document, validate_id};
use crate::filter::{Filter, FilterExpr};
use crate::query::{QueryPlan, QuerySource, Queryable};
use crate::repository::{DeleteResult, Repository, UpdateResult};
use crate::storage::{DocumentStore, ReplaceOutcome, StoredDocument};
use crate::update::{Instruction, UpdateSpec};
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// What happened to one document during an emulated partial update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Touch {
    /// Deleted or no longer matching by the time it was reloaded.
    Gone,
    Unchanged,
    Modified,
}

/// A document's new body, computed on a copy and not yet written.
#[derive(Debug)]
enum Staged {
    Gone,
    Unchanged,
    Write { version: u64, body: Value },
}

/// Repository over a whole-document store.
///
/// Partial updates are emulated: under the collection's critical section
/// each document is loaded, changed on a copy, and written back with a
/// version check. A version mismatch reloads and retries, without backoff,
/// up to `max_attempts` times before giving up with a concurrency conflict.
pub struct EmbeddedRepository<T> {
    store: Arc<dyn DocumentStore>,
    locks: CollectionLocks,
    auditor: Auditor,
    max_attempts: usize,
    cancel: Option<CancellationToken>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> EmbeddedRepository<T> {
    pub fn new(store: Arc<dyn DocumentStore>, auditor: Auditor) -> Self {
        Self {
            store,
            locks: CollectionLocks::new(),
            auditor,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cancel: None,
            _marker: PhantomData,
        }
    }

    /// Shares critical sections with other repositories over the same store.
    pub fn with_locks(mut self, locks: CollectionLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Every operation of the returned repository aborts with
    /// `RepoError::Cancelled` once `token` fires.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            ..self.clone()
        }
    }

    async fn matching(&self, filter: &FilterExpr, first_only: bool) -> Result<Vec<StoredDocument>> {
        let documents = self.store.scan(T::COLLECTION).await?;
        let matching = documents.into_iter().filter(|doc| filter.matches(&doc.body));
        Ok(if first_only {
            matching.take(1).collect()
        } else {
            matching.collect()
        })
    }

    /// Applies the instructions and the updated stamp to a copy of `current`.
    fn stage(
        current: &StoredDocument,
        filter: &FilterExpr,
        instructions: &[Instruction],
        stamp: &AuditStamp,
    ) -> Result<Staged> {
        if !filter.matches(&current.body) {
            return Ok(Staged::Gone);
        }
        let mut working = current.body.clone();
        if !apply_instructions(&mut working, instructions)? {
            return Ok(Staged::Unchanged);
        }
        if document_id(&working) != Some(current.id.as_str()) {
            return Err(RepoError::validation("the id field cannot be modified"));
        }
        if let Value::Object(fields) = &mut working {
            stamp.apply_updated_to_document(fields);
        }
        Ok(Staged::Write {
            version: current.version,
            body: working,
        })
    }

    /// Writes a staged body with a version check; a mismatch reloads,
    /// restages and tries again. Caller holds the section.
    async fn commit(
        &self,
        id: &str,
        mut staged: Staged,
        filter: &FilterExpr,
        instructions: &[Instruction],
        stamp: &AuditStamp,
    ) -> Result<Touch> {
        for attempt in 1..=self.max_attempts {
            let (version, body) = match staged {
                Staged::Gone => return Ok(Touch::Gone),
                Staged::Unchanged => return Ok(Touch::Unchanged),
                Staged::Write { version, body } => (version, body),
            };

            match self.store.replace(T::COLLECTION, id, version, body).await? {
                ReplaceOutcome::Replaced(_) => return Ok(Touch::Modified),
                ReplaceOutcome::Missing => return Ok(Touch::Gone),
                ReplaceOutcome::VersionMismatch { actual } => {
                    warn!(
                        "{} '{}' changed underneath (expected version {}, found {}), retrying (attempt {} of {})",
                        T::COLLECTION,
                        id,
                        version,
                        actual,
                        attempt,
                        self.max_attempts
                    );
                }
            }
            if attempt == self.max_attempts {
                break;
            }
            staged = match self.store.get(T::COLLECTION, id).await? {
                Some(current) => Self::stage(&current, filter, instructions, stamp)?,
                None => Staged::Gone,
            };
        }

        Err(RepoError::ConcurrencyConflict {
            collection: T::COLLECTION.to_string(),
            id: id.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Every matched document is changed on a copy first; the first failing
    /// instruction aborts the command before anything is written.
    async fn apply_update(&self, filter: Filter<T>, update: UpdateSpec<T>, first_only: bool) -> Result<UpdateResult> {
        let filter = filter.into_expr()?;
        let instructions = update.into_instructions();
        let stamp = self.auditor.stamp();

        cancellable(self.cancel.as_ref(), async move {
            let _section = self.locks.acquire(T::COLLECTION).await;
            let staged = self
                .matching(&filter, first_only)
                .await?
                .into_iter()
                .map(|doc| Self::stage(&doc, &filter, &instructions, &stamp).map(|staged| (doc.id, staged)))
                .collect::<Result<Vec<_>>>()?;

            let mut result = UpdateResult::default();
            for (id, staged) in staged {
                match self.commit(&id, staged, &filter, &instructions, &stamp).await? {
                    Touch::Gone => {}
                    Touch::Unchanged => result.matched += 1,
                    Touch::Modified => {
                        result.matched += 1;
                        result.modified += 1;
                    }
                }
            }
            debug!(
                "{} update: matched {}, modified {}",
                T::COLLECTION,
                result.matched,
                result.modified
            );
            Ok(result)
        })
        .await
    }
}

impl<T> Clone for EmbeddedRepository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            locks: self.locks.clone(),
            auditor: self.auditor.clone(),
            max_attempts: self.max_attempts,
            cancel: self.cancel.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> fmt::Debug for EmbeddedRepository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedRepository")
            .field("collection", &T::COLLECTION)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for EmbeddedRepository<T> {
    async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        // No stored document can carry an id that fails validation.
        if validate_id(id).is_err() {
            return Ok(None);
        }
        cancellable(self.cancel.as_ref(), async move {
            match self.store.get(T::COLLECTION, id).await? {
                Some(doc) => from_document(doc.body).map(Some),
                None => Ok(None),
            }
        })
        .await
    }

    fn query(&self) -> Queryable<T> {
        Queryable::new(Arc::new(StoreQuerySource {
            store: self.store.clone(),
            cancel: self.cancel.clone(),
        }))
    }

    async fn insert(&self, entity: T) -> Result<T> {
        let (document, entity) = self.auditor.stamp().stamp_insert(entity)?;
        let id = entity.id().to_string();
        cancellable(self.cancel.as_ref(), async move {
            let _section = self.locks.acquire(T::COLLECTION).await;
            self.store.insert(T::COLLECTION, &id, document).await?;
            Ok(entity)
        })
        .await
    }

    async fn insert_many(&self, entities: Vec<T>) -> Result<Vec<T>> {
        let stamp = self.auditor.stamp();
        let mut documents = Vec::with_capacity(entities.len());
        let mut stored = Vec::with_capacity(entities.len());
        for entity in entities {
            let (document, entity) = stamp.stamp_insert(entity)?;
            documents.push((entity.id().to_string(), document));
            stored.push(entity);
        }
        if documents.is_empty() {
            return Ok(stored);
        }
        cancellable(self.cancel.as_ref(), async move {
            let _section = self.locks.acquire(T::COLLECTION).await;
            self.store.insert_batch(T::COLLECTION, documents).await?;
            Ok(stored)
        })
        .await
    }

    async fn update(&self, entity: T) -> Result<T> {
        validate_id(entity.id())?;
        let stamp = self.auditor.stamp();
        let id = entity.id().to_string();
        let mut replacement = to_document(&entity)?;

        cancellable(self.cancel.as_ref(), async move {
            let _section = self.locks.acquire(T::COLLECTION).await;
            for attempt in 1..=self.max_attempts {
                let Some(current) = self.store.get(T::COLLECTION, &id).await? else {
                    return Err(RepoError::not_found(T::COLLECTION, id.as_str()));
                };
                if let Value::Object(fields) = &mut replacement {
                    AuditStamp::preserve_created(&current.body, fields);
                    stamp.apply_updated_to_document(fields);
                }

                match self
                    .store
                    .replace(T::COLLECTION, &id, current.version, replacement.clone())
                    .await?
                {
                    ReplaceOutcome::Replaced(_) => return from_document(replacement),
                    ReplaceOutcome::Missing => {
                        return Err(RepoError::not_found(T::COLLECTION, id.as_str()));
                    }
                    ReplaceOutcome::VersionMismatch { actual } => {
                        warn!(
                            "{} '{}' replaced concurrently (expected version {}, found {}), retrying (attempt {} of {})",
                            T::COLLECTION,
                            id,
                            current.version,
                            actual,
                            attempt,
                            self.max_attempts
                        );
                    }
                }
            }
            Err(RepoError::ConcurrencyConflict {
                collection: T::COLLECTION.to_string(),
                id: id.clone(),
                attempts: self.max_attempts,
            })
        })
        .await
    }

    async fn delete_by_id(&self, id: &str) -> Result<DeleteResult> {
        validate_id(id)?;
        cancellable(self.cancel.as_ref(), async move {
            let _section = self.locks.acquire(T::COLLECTION).await;
            let removed = self.store.delete(T::COLLECTION, id).await?;
            Ok(DeleteResult {
                deleted: u64::from(removed),
            })
        })
        .await
    }

    async fn delete_many(&self, filter: Filter<T>) -> Result<DeleteResult> {
        let filter = filter.into_expr()?;
        cancellable(self.cancel.as_ref(), async move {
            let _section = self.locks.acquire(T::COLLECTION).await;
            let mut result = DeleteResult::default();
            for doc in self.matching(&filter, false).await? {
                if self.store.delete(T::COLLECTION, &doc.id).await? {
                    result.deleted += 1;
                }
            }
            Ok(result)
        })
        .await
    }

    async fn update_one(&self, filter: Filter<T>, update: UpdateSpec<T>) -> Result<UpdateResult> {
        self.apply_update(filter, update, true).await
    }

    async fn update_many(&self, filter: Filter<T>, update: UpdateSpec<T>) -> Result<UpdateResult> {
        self.apply_update(filter, update, false).await
    }

    async fn clear(&self) -> Result<DeleteResult> {
        cancellable(self.cancel.as_ref(), async move {
            let _section = self.locks.acquire(T::COLLECTION).await;
            let deleted = self.store.clear(T::COLLECTION).await?;
            Ok(DeleteResult { deleted })
        })
        .await
    }
}

/// Runs query plans by scanning the collection in insertion order.
struct StoreQuerySource {
    store: Arc<dyn DocumentStore>,
    cancel: Option<CancellationToken>,
}

#[async_trait]
impl QuerySource for StoreQuerySource {
    async fn find(&self, collection: &str, plan: &QueryPlan) -> Result<Vec<Value>> {
        cancellable(self.cancel.as_ref(), async move {
            let documents = self.store.scan(collection).await?;
            Ok(plan.execute(documents.into_iter().map(|doc| doc.body)))
        })
        .await
    }
}
