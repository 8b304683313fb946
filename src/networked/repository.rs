use super::client::DocumentClient;
use super::wire::{DeleteCommand, ReplaceCommand, UpdateCommand};
use crate::audit::Auditor;
use crate::core::{Result, cancellable};
use crate::entity::{Entity, from_document, to_document, validate_id};
use crate::filter::Filter;
use crate::query::{QueryPlan, QuerySource, Queryable};
use crate::repository::{DeleteResult, Repository, UpdateResult};
use crate::update::UpdateSpec;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Repository over the networked document server.
///
/// Every mutation is one server-side command; the server applies it under
/// its own per-collection atomicity, so this adapter holds no locks and
/// never retries.
pub struct NetworkedRepository<T> {
    client: DocumentClient,
    auditor: Auditor,
    cancel: Option<CancellationToken>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> NetworkedRepository<T> {
    pub fn new(client: DocumentClient, auditor: Auditor) -> Self {
        Self {
            client,
            auditor,
            cancel: None,
            _marker: PhantomData,
        }
    }

    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            ..self.clone()
        }
    }

    async fn send_update(&self, filter: Filter<T>, update: UpdateSpec<T>, multi: bool) -> Result<UpdateResult> {
        let command = UpdateCommand {
            filter: filter.into_expr()?,
            update: update.into_instructions(),
            on_modified: self.auditor.stamp().updated_instructions(),
            multi,
        };
        cancellable(self.cancel.as_ref(), self.client.update(T::COLLECTION, &command)).await
    }
}

impl<T> Clone for NetworkedRepository<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            auditor: self.auditor.clone(),
            cancel: self.cancel.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> fmt::Debug for NetworkedRepository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkedRepository")
            .field("collection", &T::COLLECTION)
            .field("base_url", &self.client.base_url().as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for NetworkedRepository<T> {
    async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        if validate_id(id).is_err() {
            return Ok(None);
        }
        match cancellable(self.cancel.as_ref(), self.client.get(T::COLLECTION, id)).await? {
            Some(document) => from_document(document).map(Some),
            None => Ok(None),
        }
    }

    fn query(&self) -> Queryable<T> {
        Queryable::new(Arc::new(ClientQuerySource {
            client: self.client.clone(),
            cancel: self.cancel.clone(),
        }))
    }

    async fn insert(&self, entity: T) -> Result<T> {
        let (document, entity) = self.auditor.stamp().stamp_insert(entity)?;
        cancellable(
            self.cancel.as_ref(),
            self.client.insert(T::COLLECTION, vec![document]),
        )
        .await?;
        Ok(entity)
    }

    async fn insert_many(&self, entities: Vec<T>) -> Result<Vec<T>> {
        if entities.is_empty() {
            return Ok(entities);
        }
        let stamp = self.auditor.stamp();
        let mut documents = Vec::with_capacity(entities.len());
        let mut stored = Vec::with_capacity(entities.len());
        for entity in entities {
            let (document, entity) = stamp.stamp_insert(entity)?;
            documents.push(document);
            stored.push(entity);
        }
        cancellable(self.cancel.as_ref(), self.client.insert(T::COLLECTION, documents)).await?;
        Ok(stored)
    }

    async fn update(&self, entity: T) -> Result<T> {
        validate_id(entity.id())?;
        let command = ReplaceCommand {
            document: to_document(&entity)?,
            on_replace: self.auditor.stamp().updated_instructions(),
        };
        let stored = cancellable(
            self.cancel.as_ref(),
            self.client.replace(T::COLLECTION, entity.id(), &command),
        )
        .await?;
        from_document(stored)
    }

    async fn delete_by_id(&self, id: &str) -> Result<DeleteResult> {
        validate_id(id)?;
        cancellable(self.cancel.as_ref(), self.client.delete_by_id(T::COLLECTION, id)).await
    }

    async fn delete_many(&self, filter: Filter<T>) -> Result<DeleteResult> {
        let command = DeleteCommand {
            filter: filter.into_expr()?,
            multi: true,
        };
        cancellable(self.cancel.as_ref(), self.client.delete(T::COLLECTION, &command)).await
    }

    async fn update_one(&self, filter: Filter<T>, update: UpdateSpec<T>) -> Result<UpdateResult> {
        self.send_update(filter, update, false).await
    }

    async fn update_many(&self, filter: Filter<T>, update: UpdateSpec<T>) -> Result<UpdateResult> {
        self.send_update(filter, update, true).await
    }

    async fn count(&self, filter: Filter<T>) -> Result<u64> {
        let filter = filter.into_expr()?;
        cancellable(self.cancel.as_ref(), self.client.count(T::COLLECTION, &filter)).await
    }

    async fn clear(&self) -> Result<DeleteResult> {
        cancellable(self.cancel.as_ref(), self.client.clear(T::COLLECTION)).await
    }
}

struct ClientQuerySource {
    client: DocumentClient,
    cancel: Option<CancellationToken>,
}

#[async_trait]
impl QuerySource for ClientQuerySource {
    async fn find(&self, collection: &str, plan: &QueryPlan) -> Result<Vec<Value>> {
        cancellable(self.cancel.as_ref(), self.client.find(collection, plan)).await
    }
}
