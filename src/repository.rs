//! The repository contract business code depends on.
//!
//! [`Repository`] holds the object-safe core that each backend implements.
//! [`RepositoryExt`] layers the typed field and sub-document operations on
//! top of `update_one`/`update_many`, so both backends share them unchanged.

use crate::core::Result;
use crate::entity::Entity;
use crate::filter::Filter;
use crate::path::FieldPath;
use crate::query::Queryable;
use crate::update::{Numeric, UpdateBuilder, UpdateSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One document by id, or every document of the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Id(String),
    All,
}

impl Target {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }
}

impl From<&str> for Target {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

impl From<String> for Target {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Documents that satisfied the filter.
    pub matched: u64,
    /// Documents actually changed (and audit-stamped).
    pub modified: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted: u64,
}

#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Point lookup; an absent id is `Ok(None)`.
    async fn get_by_id(&self, id: &str) -> Result<Option<T>>;

    async fn get_one(&self, filter: Filter<T>) -> Result<Option<T>> {
        self.query().filter(filter).first().await
    }

    /// Lazy sequence over every document of `T`.
    fn query(&self) -> Queryable<T>;

    /// Stamps `created_*`, assigns an id when missing and stores one document.
    async fn insert(&self, entity: T) -> Result<T>;

    /// Inserts a batch; a duplicate id anywhere rejects the whole batch.
    async fn insert_many(&self, entities: Vec<T>) -> Result<Vec<T>>;

    /// Replaces the stored document, keeping its `created_*` fields.
    async fn update(&self, entity: T) -> Result<T>;

    async fn delete(&self, entity: &T) -> Result<DeleteResult> {
        self.delete_by_id(entity.id()).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<DeleteResult>;

    async fn delete_many(&self, filter: Filter<T>) -> Result<DeleteResult>;

    /// Applies `update` to the first document matching `filter`.
    async fn update_one(&self, filter: Filter<T>, update: UpdateSpec<T>) -> Result<UpdateResult>;

    /// Applies `update` to every document matching `filter`.
    async fn update_many(&self, filter: Filter<T>, update: UpdateSpec<T>) -> Result<UpdateResult>;

    async fn count(&self, filter: Filter<T>) -> Result<u64> {
        self.query().filter(filter).count().await
    }

    /// Removes every document of `T`.
    async fn clear(&self) -> Result<DeleteResult>;
}

/// Field and sub-document operations, each compiled into a one-instruction
/// [`UpdateSpec`].
#[async_trait]
pub trait RepositoryExt<T: Entity>: Repository<T> {
    async fn update_field<V, Q>(&self, id: &str, field: FieldPath<T, V>, value: Q) -> Result<UpdateResult>
    where
        V: Serialize + Send + 'static,
        Q: Into<V> + Send + 'static,
    {
        let spec = UpdateBuilder::new().set(field, value).build()?;
        self.update_one(Filter::id(id), spec).await
    }

    /// Atomic increment; concurrent callers never lose updates.
    async fn inc_field<V>(&self, id: &str, field: FieldPath<T, V>, amount: V) -> Result<UpdateResult>
    where
        V: Numeric + Send + 'static,
    {
        let spec = UpdateBuilder::new().inc(field, amount).build()?;
        self.update_one(Filter::id(id), spec).await
    }

    /// Appends `item`; `Target::All` broadcasts to every document.
    async fn add_to_set<E>(&self, target: Target, collection: FieldPath<T, Vec<E>>, item: E) -> Result<UpdateResult>
    where
        E: Serialize + Send + 'static,
    {
        let spec = UpdateBuilder::new().push(collection, item).build()?;
        self.update_target(target, spec).await
    }

    /// Removes every element equal to `item`.
    async fn pull<E>(&self, target: Target, collection: FieldPath<T, Vec<E>>, item: E) -> Result<UpdateResult>
    where
        E: Serialize + Send + 'static,
    {
        let spec = UpdateBuilder::new().pull(collection, item).build()?;
        self.update_target(target, spec).await
    }

    /// Removes every element whose key field equals `key`.
    async fn pull_by_key<E, K, Q>(
        &self,
        target: Target,
        collection: FieldPath<T, Vec<E>>,
        key_field: FieldPath<E, K>,
        key: Q,
    ) -> Result<UpdateResult>
    where
        E: Send + 'static,
        K: Serialize + Send + 'static,
        Q: Into<K> + Send + 'static,
    {
        let spec = UpdateBuilder::new()
            .pull_by_key(collection, key_field, key)
            .build()?;
        self.update_target(target, spec).await
    }

    /// Removes the elements satisfying `filter`, keeping survivors in order.
    async fn pull_filter<E>(&self, id: &str, collection: FieldPath<T, Vec<E>>, filter: Filter<E>) -> Result<UpdateResult>
    where
        E: Send + 'static,
    {
        let spec = UpdateBuilder::new().pull_where(collection, filter).build()?;
        self.update_one(Filter::id(id), spec).await
    }

    /// Replaces the first element matching `filter`; no-op when none does.
    async fn update_to_set<E>(
        &self,
        id: &str,
        collection: FieldPath<T, Vec<E>>,
        filter: Filter<E>,
        item: E,
    ) -> Result<UpdateResult>
    where
        E: Serialize + Send + 'static,
    {
        let spec = UpdateBuilder::new()
            .set_where(collection.matching(filter), item)
            .build()?;
        self.update_one(Filter::id(id), spec).await
    }

    /// Replaces every element matching `filter`.
    async fn update_to_set_all<E>(
        &self,
        id: &str,
        collection: FieldPath<T, Vec<E>>,
        filter: Filter<E>,
        item: E,
    ) -> Result<UpdateResult>
    where
        E: Serialize + Send + 'static,
    {
        let spec = UpdateBuilder::new()
            .set_where(collection.matching_all(filter), item)
            .build()?;
        self.update_one(Filter::id(id), spec).await
    }

    async fn update_target(&self, target: Target, update: UpdateSpec<T>) -> Result<UpdateResult> {
        match target {
            Target::Id(id) => self.update_one(Filter::id(id), update).await,
            Target::All => self.update_many(Filter::all(), update).await,
        }
    }
}

impl<T: Entity, R: Repository<T> + ?Sized> RepositoryExt<T> for R {}
