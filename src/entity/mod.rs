//! Entity model shared by every persisted type.
//!
//! Every entity embeds a [`BaseEntity`] (flattened into the stored document)
//! and names the collection it lives in. The [`impl_entity!`](crate::impl_entity)
//! macro wires both up for the common case.

use crate::core::{RepoError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

pub mod user_field;

pub use user_field::{HasUserFields, UserField, UserFieldsExt};

pub const ID_FIELD: &str = "id";
pub const CREATED_ON_FIELD: &str = "created_on_utc";
pub const CREATED_BY_FIELD: &str = "created_by";
pub const UPDATED_ON_FIELD: &str = "updated_on_utc";
pub const UPDATED_BY_FIELD: &str = "updated_by";

/// Identity and audit metadata carried by every stored document.
///
/// `created_*` are written once by the first successful insert; `updated_*`
/// are overwritten by every successful update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseEntity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_on_utc: DateTime<Utc>,
    #[serde(default)]
    pub updated_on_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl BaseEntity {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Logical collection name, one per entity type.
    const COLLECTION: &'static str;

    fn base(&self) -> &BaseEntity;

    fn base_mut(&mut self) -> &mut BaseEntity;

    fn id(&self) -> &str {
        &self.base().id
    }
}

/// Implements [`Entity`] for a struct holding its [`BaseEntity`] in a field.
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Product {
///     #[serde(flatten)]
///     base: BaseEntity,
///     name: String,
/// }
///
/// impl_entity!(Product);                  // collection "Product", field `base`
/// impl_entity!(Order, "orders");          // explicit collection name
/// impl_entity!(Customer, "Customer", meta); // BaseEntity stored in `meta`
/// ```
#[macro_export]
macro_rules! impl_entity {
    ($ty:ident) => {
        $crate::impl_entity!($ty, stringify!($ty), base);
    };
    ($ty:ty, $collection:expr) => {
        $crate::impl_entity!($ty, $collection, base);
    };
    ($ty:ty, $collection:expr, $field:ident) => {
        impl $crate::entity::Entity for $ty {
            const COLLECTION: &'static str = $collection;

            fn base(&self) -> &$crate::entity::BaseEntity {
                &self.$field
            }

            fn base_mut(&mut self) -> &mut $crate::entity::BaseEntity {
                &mut self.$field
            }
        }
    };
}

pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Rejects ids that are blank or carry surrounding whitespace.
pub fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(RepoError::validation("entity id must not be blank"));
    }
    if id.trim() != id {
        return Err(RepoError::validation(format!(
            "entity id '{}' must not contain surrounding whitespace",
            id
        )));
    }
    Ok(())
}

/// Serializes an entity into its stored document form.
pub fn to_document<T: Entity>(entity: &T) -> Result<Value> {
    let value = serde_json::to_value(entity)?;
    if !value.is_object() {
        return Err(RepoError::validation(format!(
            "{} must serialize to a JSON object",
            T::COLLECTION
        )));
    }
    Ok(value)
}

pub fn from_document<T: Entity>(document: Value) -> Result<T> {
    serde_json::from_value(document).map_err(|e| {
        RepoError::Serialization(format!("failed to decode {} document: {}", T::COLLECTION, e))
    })
}

/// Reads the `id` field of a stored document.
pub fn document_id(document: &Value) -> Option<&str> {
    document.get(ID_FIELD).and_then(Value::as_str)
}
