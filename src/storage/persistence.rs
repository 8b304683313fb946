//! Write-ahead log and snapshots for the embedded store.
//!
//! Every mutation is appended to the log as a length-prefixed MessagePack
//! record. After `checkpoint_every` records the whole store is written to a
//! snapshot (atomically, through a temp file in the same directory) and the
//! log is truncated. Recovery loads the snapshot, then replays the log.

use super::collection::Collection;
use super::engine::StoredDocument;
use crate::core::{RepoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

const WAL_FILE: &str = "docrepo.wal";
const SNAPSHOT_FILE: &str = "docrepo.snapshot";

pub const DEFAULT_CHECKPOINT_EVERY: usize = 1000;

// ============================================================================
// Records
// ============================================================================

/// Document bodies travel as JSON text so MessagePack never has to guess
/// their shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub version: u64,
    pub seq: u64,
    pub body: String,
}

impl DocumentRecord {
    fn from_stored(doc: &StoredDocument) -> Result<Self> {
        Ok(Self {
            id: doc.id.clone(),
            version: doc.version,
            seq: doc.seq,
            body: serde_json::to_string(&doc.body)?,
        })
    }

    fn into_stored(self) -> Result<StoredDocument> {
        Ok(StoredDocument {
            body: serde_json::from_str(&self.body)?,
            id: self.id,
            version: self.version,
            seq: self.seq,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntry {
    Put { collection: String, record: DocumentRecord },
    Remove { collection: String, id: String },
    Clear { collection: String },
}

impl WalEntry {
    pub fn put(collection: &str, doc: &StoredDocument) -> Result<Self> {
        Ok(Self::Put {
            collection: collection.to_string(),
            record: DocumentRecord::from_stored(doc)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub collections: HashMap<String, Vec<DocumentRecord>>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: u64,
    pub document_count: usize,
    pub collection_count: usize,
}

impl StoreSnapshot {
    pub fn new(collections: &HashMap<String, Vec<StoredDocument>>) -> Result<Self> {
        let mut records = HashMap::with_capacity(collections.len());
        for (name, documents) in collections {
            let encoded = documents
                .iter()
                .map(DocumentRecord::from_stored)
                .collect::<Result<Vec<_>>>()?;
            records.insert(name.clone(), encoded);
        }

        Ok(Self {
            version: 1,
            metadata: SnapshotMetadata {
                created_at: now_millis(),
                document_count: collections.values().map(Vec::len).sum(),
                collection_count: collections.len(),
            },
            collections: records,
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Durability
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// fsync after every log record.
    Sync,
    /// Flush to the OS, let it schedule the disk write.
    #[default]
    Async,
    /// Keep everything in memory.
    None,
}

impl FromStr for DurabilityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            "none" | "memory" => Ok(Self::None),
            other => Err(format!("unknown durability mode '{}' (expected sync, async or none)", other)),
        }
    }
}

impl fmt::Display for DurabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync => "sync",
            Self::Async => "async",
            Self::None => "none",
        })
    }
}

fn storage_err(context: &str, err: impl fmt::Display) -> RepoError {
    RepoError::Storage(format!("{}: {}", context, err))
}

// ============================================================================
// WAL Manager
// ============================================================================

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent).map_err(|e| storage_err("failed to create WAL directory", e))?;
        }

        let wal_file = if durability_mode != DurabilityMode::None {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&wal_path)
                .map_err(|e| storage_err("failed to open WAL file", e))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            wal_path,
            wal_file,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: DEFAULT_CHECKPOINT_EVERY,
        })
    }

    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        self.append_all(std::slice::from_ref(entry))
    }

    /// Appends `entries` as one write. On failure the file is cut back to
    /// where it was, so recovery never replays part of the batch.
    pub fn append_all(&mut self, entries: &[WalEntry]) -> Result<()> {
        if self.durability_mode == DurabilityMode::None || entries.is_empty() {
            return Ok(());
        }
        let mut frame = Vec::new();
        for entry in entries {
            let serialized = rmp_serde::to_vec(entry).map_err(|e| storage_err("failed to encode WAL entry", e))?;
            frame.extend_from_slice(&(serialized.len() as u32).to_le_bytes());
            frame.extend_from_slice(&serialized);
        }

        let file = self
            .wal_file
            .as_mut()
            .ok_or_else(|| RepoError::Storage("WAL file not initialized".to_string()))?;
        // The writer is flushed after every append, so its buffer is empty here.
        let file = file.get_mut();
        let start = file
            .metadata()
            .map_err(|e| storage_err("failed to stat WAL", e))?
            .len();
        let written = file
            .write_all(&frame)
            .map_err(|e| storage_err("failed to write WAL", e))
            .and_then(|()| match self.durability_mode {
                DurabilityMode::Sync => file.sync_all().map_err(|e| storage_err("failed to sync WAL", e)),
                _ => Ok(()),
            });
        if let Err(err) = written {
            if let Err(truncate) = file.set_len(start) {
                log::error!("Could not cut WAL {:?} back after a failed write: {}", self.wal_path, truncate);
            }
            return Err(err);
        }
        self.entries_since_checkpoint += entries.len();
        Ok(())
    }

    /// Reads every complete record; a torn tail from a crash mid-append is
    /// dropped.
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        if !self.wal_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.wal_path).map_err(|e| storage_err("failed to open WAL for reading", e))?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(storage_err("failed to read WAL entry length", e)),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::warn!("Dropping truncated WAL record at end of {:?}", self.wal_path);
                    break;
                }
                Err(e) => return Err(storage_err("failed to read WAL entry", e)),
            }
            let entry: WalEntry =
                rmp_serde::from_slice(&data).map_err(|e| storage_err("failed to decode WAL entry", e))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.wal_path)
            .map_err(|e| storage_err("failed to truncate WAL", e))?;
        self.wal_file = Some(BufWriter::new(file));
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold.max(1);
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let dir = self
            .snapshot_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| storage_err("failed to create snapshot directory", e))?;

        let serialized = rmp_serde::to_vec(snapshot).map_err(|e| storage_err("failed to encode snapshot", e))?;
        let mut temp = NamedTempFile::new_in(dir).map_err(|e| storage_err("failed to create temp file", e))?;
        temp.write_all(&serialized)
            .map_err(|e| storage_err("failed to write snapshot", e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| storage_err("failed to sync snapshot", e))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| storage_err("failed to move snapshot into place", e.error))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.snapshot_path).map_err(|e| storage_err("failed to read snapshot", e))?;
        let snapshot: StoreSnapshot =
            rmp_serde::from_slice(&data).map_err(|e| storage_err("failed to decode snapshot", e))?;
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(WAL_FILE), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
        })
    }

    pub fn log(&mut self, entry: &WalEntry) -> Result<()> {
        self.wal.append(entry)
    }

    pub fn log_all(&mut self, entries: &[WalEntry]) -> Result<()> {
        self.wal.append_all(entries)
    }

    pub fn checkpoint(&mut self, collections: &HashMap<String, Vec<StoredDocument>>) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let snapshot = StoreSnapshot::new(collections)?;
        self.snapshot.save(&snapshot)?;
        self.wal.clear()?;
        log::debug!(
            "Checkpoint written: {} documents in {} collections",
            snapshot.metadata.document_count,
            snapshot.metadata.collection_count
        );
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Rebuilds collections from the snapshot plus the log written after it.
    pub fn recover(&self) -> Result<HashMap<String, Collection>> {
        let mut collections: HashMap<String, Collection> = HashMap::new();

        if let Some(snapshot) = self.snapshot.load()? {
            for (name, records) in snapshot.collections {
                let collection = collections.entry(name).or_default();
                for record in records {
                    collection.restore(record.into_stored()?);
                }
            }
        }

        let entries = self.wal.read_all()?;
        let replayed = entries.len();
        for entry in entries {
            match entry {
                WalEntry::Put { collection, record } => {
                    collections
                        .entry(collection)
                        .or_default()
                        .restore(record.into_stored()?);
                }
                WalEntry::Remove { collection, id } => {
                    if let Some(collection) = collections.get_mut(&collection) {
                        collection.forget(&id);
                    }
                }
                WalEntry::Clear { collection } => {
                    if let Some(collection) = collections.get_mut(&collection) {
                        collection.reset();
                    }
                }
            }
        }
        if replayed > 0 {
            log::info!("Replayed {} WAL entries", replayed);
        }
        Ok(collections)
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }

    pub fn snapshot(&self) -> &SnapshotManager {
        &self.snapshot
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}
