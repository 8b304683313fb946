//! Backend selection.
//!
//! A [`StoreConfig`] is read once at process start and turned into a
//! [`StoreBackend`]; repositories handed out afterwards are bound to that
//! backend for their whole life.

use crate::audit::Auditor;
use crate::core::{RepoError, Result};
use crate::embedded::{DEFAULT_MAX_ATTEMPTS, EmbeddedBackend};
use crate::entity::Entity;
use crate::networked::{DocumentClient, NetworkedBackend};
use crate::repository::Repository;
use crate::storage::{DEFAULT_CHECKPOINT_EVERY, DurabilityMode, MemoryStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const URL_ENV: &str = "DOCREPO_URL";

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_checkpoint_every() -> usize {
    DEFAULT_CHECKPOINT_EVERY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Networked {
        base_url: String,
        #[serde(default = "default_request_timeout_ms")]
        request_timeout_ms: u64,
        #[serde(default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
    },
    Embedded {
        /// `None` keeps everything in memory.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_dir: Option<PathBuf>,
        #[serde(default)]
        durability: DurabilityMode,
        #[serde(default = "default_max_attempts")]
        max_conflict_attempts: usize,
        #[serde(default = "default_checkpoint_every")]
        checkpoint_every: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendConfig,
}

impl StoreConfig {
    pub fn networked(base_url: &str) -> Self {
        Self {
            backend: BackendConfig::Networked {
                base_url: base_url.to_string(),
                request_timeout_ms: default_request_timeout_ms(),
                connect_timeout_ms: default_connect_timeout_ms(),
            },
        }
    }

    /// Volatile embedded store.
    pub fn in_memory() -> Self {
        Self {
            backend: BackendConfig::Embedded {
                data_dir: None,
                durability: DurabilityMode::None,
                max_conflict_attempts: default_max_attempts(),
                checkpoint_every: default_checkpoint_every(),
            },
        }
    }

    /// Durable embedded store rooted at `data_dir`.
    pub fn embedded<P: AsRef<Path>>(data_dir: P) -> Self {
        Self::in_memory()
            .data_dir(data_dir)
            .durability(DurabilityMode::default())
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        if let BackendConfig::Embedded { data_dir, .. } = &mut self.backend {
            *data_dir = Some(dir.as_ref().to_path_buf());
        }
        self
    }

    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        if let BackendConfig::Embedded { durability, .. } = &mut self.backend {
            *durability = mode;
        }
        self
    }

    pub fn max_conflict_attempts(mut self, attempts: usize) -> Self {
        if let BackendConfig::Embedded {
            max_conflict_attempts,
            ..
        } = &mut self.backend
        {
            *max_conflict_attempts = attempts;
        }
        self
    }

    pub fn checkpoint_every(mut self, entries: usize) -> Self {
        if let BackendConfig::Embedded { checkpoint_every, .. } = &mut self.backend {
            *checkpoint_every = entries;
        }
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        if let BackendConfig::Networked {
            request_timeout_ms, ..
        } = &mut self.backend
        {
            *request_timeout_ms = timeout.as_millis() as u64;
        }
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        if let BackendConfig::Networked {
            connect_timeout_ms, ..
        } = &mut self.backend
        {
            *connect_timeout_ms = timeout.as_millis() as u64;
        }
        self
    }

    /// Parses a store URL.
    ///
    /// ```ignore
    /// StoreConfig::from_url("http://127.0.0.1:7070")?;            // networked
    /// StoreConfig::from_url("memory://")?;                        // volatile embedded
    /// StoreConfig::from_url("embedded:///var/lib/app?durability=sync")?;
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let config = Self::networked(url);
            config.validate()?;
            return Ok(config);
        }
        if let Some(rest) = url.strip_prefix("memory://") {
            if !rest.is_empty() {
                return Err(RepoError::validation("memory:// URLs take no path"));
            }
            return Ok(Self::in_memory());
        }
        if let Some(rest) = url.strip_prefix("embedded://") {
            let (path, query) = match rest.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (rest, None),
            };
            if path.is_empty() {
                return Err(RepoError::validation("embedded:// URLs need a data directory"));
            }
            let mut config = Self::embedded(path);
            for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                config = match key {
                    "durability" => config.durability(value.parse().map_err(RepoError::Validation)?),
                    "checkpoint_every" => config.checkpoint_every(parse_number(key, value)?),
                    "max_conflict_attempts" => config.max_conflict_attempts(parse_number(key, value)?),
                    other => {
                        return Err(RepoError::validation(format!(
                            "unknown store URL option '{}'",
                            other
                        )));
                    }
                };
            }
            config.validate()?;
            return Ok(config);
        }
        Err(RepoError::validation(format!(
            "unsupported store URL '{}' (expected http(s)://, memory:// or embedded://)",
            url
        )))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RepoError::validation(format!("invalid store configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            RepoError::validation(format!("cannot read store configuration {:?}: {}", path, e))
        })?;
        Self::from_json_str(&json)
    }

    /// Reads `DOCREPO_URL`; `None` when unset.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var(URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::from_url(url.trim()).map(Some),
            _ => Ok(None),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.backend {
            BackendConfig::Networked {
                base_url,
                request_timeout_ms,
                connect_timeout_ms,
            } => {
                if *request_timeout_ms == 0 || *connect_timeout_ms == 0 {
                    return Err(RepoError::validation("timeouts must be > 0"));
                }
                DocumentClient::new(base_url).map(|_| ())
            }
            BackendConfig::Embedded {
                durability,
                data_dir,
                max_conflict_attempts,
                checkpoint_every,
            } => {
                if *max_conflict_attempts == 0 {
                    return Err(RepoError::validation("max_conflict_attempts must be > 0"));
                }
                if *checkpoint_every == 0 {
                    return Err(RepoError::validation("checkpoint_every must be > 0"));
                }
                if *durability != DurabilityMode::None && data_dir.is_none() {
                    return Err(RepoError::validation(format!(
                        "durability '{}' needs a data directory",
                        durability
                    )));
                }
                Ok(())
            }
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| RepoError::validation(format!("store URL option '{}' must be a number", key)))
}

/// The backend chosen at start-up.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Networked(NetworkedBackend),
    Embedded(EmbeddedBackend),
}

impl StoreBackend {
    pub fn open(config: &StoreConfig, auditor: Auditor) -> Result<Self> {
        config.validate()?;
        match &config.backend {
            BackendConfig::Networked {
                base_url,
                request_timeout_ms,
                connect_timeout_ms,
            } => {
                let client = DocumentClient::with_timeouts(
                    base_url,
                    Duration::from_millis(*request_timeout_ms),
                    Duration::from_millis(*connect_timeout_ms),
                )?;
                log::info!("Using networked document store at {}", base_url);
                Ok(Self::Networked(NetworkedBackend::new(client, auditor)))
            }
            BackendConfig::Embedded {
                data_dir,
                durability,
                max_conflict_attempts,
                checkpoint_every,
            } => {
                let store = match data_dir {
                    Some(dir) => MemoryStore::open(dir, *durability, *checkpoint_every)?,
                    None => MemoryStore::new(),
                };
                log::info!(
                    "Using embedded document store (durable: {})",
                    store.is_durable()
                );
                let backend = EmbeddedBackend::new(Arc::new(store), auditor)
                    .with_max_attempts(*max_conflict_attempts);
                Ok(Self::Embedded(backend))
            }
        }
    }

    pub fn repository<T: Entity>(&self) -> Arc<dyn Repository<T>> {
        match self {
            Self::Networked(backend) => Arc::new(backend.repository::<T>()),
            Self::Embedded(backend) => Arc::new(backend.repository::<T>()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Networked(_) => "networked",
            Self::Embedded(_) => "embedded",
        }
    }
}
