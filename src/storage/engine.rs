use crate::core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document as the engine holds it: body plus its internal version stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    /// Starts at 1 on insert, bumped by every successful replace.
    pub version: u64,
    /// Insertion sequence, used to keep scans in insertion order.
    pub seq: u64,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced(u64),
    VersionMismatch { actual: u64 },
    Missing,
}

/// Whole-document storage backend: no partial updates, no operators.
///
/// Collections spring into existence on first write; reading an unknown
/// collection yields nothing rather than an error.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>>;

    /// Every document of the collection, in insertion order.
    async fn scan(&self, collection: &str) -> Result<Vec<StoredDocument>>;

    /// Fails with a validation error when `id` is already taken.
    async fn insert(&self, collection: &str, id: &str, body: Value) -> Result<StoredDocument>;

    /// All-or-nothing: a duplicate id anywhere rejects the whole batch.
    async fn insert_batch(&self, collection: &str, documents: Vec<(String, Value)>) -> Result<Vec<StoredDocument>>;

    /// Compare-and-swap on the version stamp.
    async fn replace(&self, collection: &str, id: &str, expected_version: u64, body: Value) -> Result<ReplaceOutcome>;

    /// Returns whether a document was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    async fn clear(&self, collection: &str) -> Result<u64>;

    async fn count(&self, collection: &str) -> Result<u64>;
}
