//! Everything application code usually needs, in one import.
//!
//! ```ignore
//! use docrepo::prelude::*;
//! ```

pub use crate::audit::{AuditProvider, Auditor, FixedActor, SystemActor};
pub use crate::config::{StoreBackend, StoreConfig};
pub use crate::core::{RepoError, Result};
pub use crate::entity::{BaseEntity, Entity, HasUserFields, UserField, UserFieldsExt};
pub use crate::filter::Filter;
pub use crate::path::FieldPath;
pub use crate::query::Queryable;
pub use crate::repository::{DeleteResult, Repository, RepositoryExt, Target, UpdateResult};
pub use crate::update::{UpdateBuilder, UpdateSpec};
pub use crate::{field, impl_entity};
