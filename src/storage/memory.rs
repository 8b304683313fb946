use super::collection::{Change, Collection};
use super::engine::{DocumentStore, ReplaceOutcome, StoredDocument};
use super::persistence::{DurabilityMode, PersistenceManager, WalEntry};
use crate::core::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// In-process document store.
///
/// Each collection sits behind its own lock, so writers to different
/// collections never wait on each other. When opened on a directory every
/// mutation is logged before the collection lock is released.
///
/// Lock order: collection locks (sorted by name when taking several), then
/// the persistence mutex.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<RwLock<Collection>>>>,
    persistence: Option<Mutex<PersistenceManager>>,
}

impl MemoryStore {
    /// Volatile store; contents vanish with the process.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            persistence: None,
        }
    }

    /// Durable store rooted at `data_dir`, recovered from its snapshot and log.
    pub fn open<P: AsRef<Path>>(data_dir: P, durability: DurabilityMode, checkpoint_every: usize) -> Result<Self> {
        if durability == DurabilityMode::None {
            return Ok(Self::new());
        }

        let mut persistence = PersistenceManager::new(data_dir.as_ref(), durability)?;
        persistence.wal_mut().set_checkpoint_threshold(checkpoint_every);
        let recovered = persistence.recover()?;
        log::info!(
            "Opened document store at {:?} ({} collections recovered, durability {})",
            data_dir.as_ref(),
            recovered.len(),
            durability
        );

        let collections = recovered
            .into_iter()
            .map(|(name, collection)| (name, Arc::new(RwLock::new(collection))))
            .collect();
        Ok(Self {
            collections: RwLock::new(collections),
            persistence: Some(Mutex::new(persistence)),
        })
    }

    pub fn is_durable(&self) -> bool {
        self.persistence.is_some()
    }

    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn handle(&self, name: &str) -> Option<Arc<RwLock<Collection>>> {
        self.collections.read().await.get(name).cloned()
    }

    async fn handle_or_create(&self, name: &str) -> Arc<RwLock<Collection>> {
        if let Some(handle) = self.handle(name).await {
            return handle;
        }
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Collection::new())))
            .clone()
    }

    /// Runs `f` with shared access; an unknown collection reads as empty.
    pub async fn read<R>(&self, name: &str, f: impl FnOnce(&Collection) -> R) -> R {
        match self.handle(name).await {
            Some(handle) => f(&*handle.read().await),
            None => f(&Collection::new()),
        }
    }

    /// Runs `f` under the collection's write lock and logs what it changed.
    ///
    /// Everything `f` does is atomic with respect to other readers and
    /// writers of the same collection. Its changes become visible only
    /// once they are in the log; if `f` fails or the log write fails the
    /// collection is rolled back.
    pub async fn mutate<R>(&self, name: &str, f: impl FnOnce(&mut Collection) -> Result<R>) -> Result<R> {
        let handle = self.handle_or_create(name).await;
        let (value, checkpoint_due) = {
            let mut collection = handle.write().await;
            let value = match f(&mut collection) {
                Ok(value) => value,
                Err(err) => {
                    collection.rollback();
                    return Err(err);
                }
            };
            if let Err(err) = self.log_changes(name, &collection).await {
                log::error!("Discarding unlogged changes to '{}': {}", name, err);
                collection.rollback();
                return Err(err);
            }
            collection.commit();
            (value, self.needs_checkpoint().await)
        };
        if checkpoint_due {
            self.checkpoint().await?;
        }
        Ok(value)
    }

    async fn log_changes(&self, name: &str, collection: &Collection) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let mut entries = Vec::with_capacity(collection.changes().len());
        for change in collection.changes() {
            let entry = match change {
                Change::Put(id) => match collection.get(id) {
                    Some(doc) => WalEntry::put(name, doc)?,
                    // Put then removed within the same call.
                    None => continue,
                },
                Change::Remove(id) => WalEntry::Remove {
                    collection: name.to_string(),
                    id: id.clone(),
                },
                Change::Clear => WalEntry::Clear {
                    collection: name.to_string(),
                },
            };
            entries.push(entry);
        }
        persistence.lock().await.log_all(&entries)
    }

    async fn needs_checkpoint(&self) -> bool {
        match &self.persistence {
            Some(persistence) => persistence.lock().await.needs_checkpoint(),
            None => false,
        }
    }

    /// Writes a snapshot of every collection and truncates the log.
    pub async fn checkpoint(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        let mut handles: Vec<(String, Arc<RwLock<Collection>>)> = self
            .collections
            .read()
            .await
            .iter()
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));

        let mut guards = Vec::with_capacity(handles.len());
        for (name, handle) in &handles {
            guards.push((name.clone(), handle.read().await));
        }
        let documents: HashMap<String, Vec<StoredDocument>> = guards
            .iter()
            .map(|(name, collection)| (name.clone(), collection.scan()))
            .collect();

        persistence.lock().await.checkpoint(&documents)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>> {
        Ok(self.read(collection, |c| c.get(id).cloned()).await)
    }

    async fn scan(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        Ok(self.read(collection, Collection::scan).await)
    }

    async fn insert(&self, collection: &str, id: &str, body: Value) -> Result<StoredDocument> {
        self.mutate(collection, |c| c.insert(id, body)).await
    }

    async fn insert_batch(&self, collection: &str, documents: Vec<(String, Value)>) -> Result<Vec<StoredDocument>> {
        self.mutate(collection, |c| c.insert_batch(documents)).await
    }

    async fn replace(&self, collection: &str, id: &str, expected_version: u64, body: Value) -> Result<ReplaceOutcome> {
        self.mutate(collection, |c| Ok(c.replace(id, expected_version, body)))
            .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.mutate(collection, |c| Ok(c.remove(id))).await
    }

    async fn clear(&self, collection: &str) -> Result<u64> {
        self.mutate(collection, |c| Ok(c.clear())).await
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        Ok(self.read(collection, |c| c.len() as u64).await)
    }
}
