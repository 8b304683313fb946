// ============================================================================
// docrepo: typed document repositories
// ============================================================================
//
// One `Repository<T>` contract, two backends:
//
// - networked: every partial update is a single server-side command run by
//   the document server (`server` module, `docrepo-server` binary);
// - embedded: an in-process store where partial updates are emulated under
//   a per-collection critical section with a version check and bounded
//   retry.
//
// Updates are composed from typed field paths (`field!`) with
// `UpdateBuilder`, and every successful insert or update carries audit
// stamps supplied by an `AuditProvider`.

pub mod audit;
pub mod config;
pub mod core;
pub mod document;
pub mod embedded;
pub mod entity;
pub mod filter;
pub mod networked;
pub mod path;
pub mod prelude;
pub mod query;
pub mod repository;
pub mod server;
pub mod storage;
pub mod update;

pub use audit::{AuditProvider, Auditor, FixedActor, SystemActor};
pub use config::{BackendConfig, StoreBackend, StoreConfig};
pub use core::{RepoError, Result};
pub use embedded::{EmbeddedBackend, EmbeddedRepository};
pub use entity::{BaseEntity, Entity, HasUserFields, UserField, UserFieldsExt};
pub use filter::Filter;
pub use networked::{DocumentClient, NetworkedBackend, NetworkedRepository};
pub use path::FieldPath;
pub use query::Queryable;
pub use repository::{DeleteResult, Repository, RepositoryExt, Target, UpdateResult};
pub use storage::{DurabilityMode, MemoryStore};
pub use update::{UpdateBuilder, UpdateSpec};
