//! Open-ended key/value extension bag carried by many entities.

use super::Entity;
use crate::core::Result;
use crate::filter::Filter;
use crate::path::FieldPath;
use crate::repository::{RepositoryExt, Target, UpdateResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One extension value, scoped per tenant. An empty `store_id` is shared by
/// every tenant. `(key, store_id)` uniqueness is left to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserField {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub store_id: String,
}

impl UserField {
    pub fn new(key: impl Into<String>, value: impl Into<String>, store_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            store_id: store_id.into(),
        }
    }

    /// Element filter selecting the field with this key and tenant.
    pub fn keyed(key: &str, store_id: &str) -> Filter<UserField> {
        Filter::eq(crate::field!(UserField, key), key)
            .and(Filter::eq(crate::field!(UserField, store_id), store_id))
    }
}

pub trait HasUserFields: Entity {
    /// Path of the `Vec<UserField>` inside the stored document.
    fn user_fields_path() -> FieldPath<Self, Vec<UserField>>;

    fn user_fields(&self) -> &[UserField];

    fn user_field(&self, key: &str, store_id: &str) -> Option<&UserField> {
        self.user_fields()
            .iter()
            .find(|field| field.key == key && field.store_id == store_id)
    }
}

#[async_trait]
pub trait UserFieldsExt<T: HasUserFields>: RepositoryExt<T> {
    /// Upserts one user field: an empty value removes it, an existing
    /// `(key, store_id)` is replaced in place, anything else is appended.
    async fn save_user_field(&self, id: &str, key: &str, value: &str, store_id: &str) -> Result<UpdateResult> {
        let path = T::user_fields_path();
        if value.is_empty() {
            return self
                .pull_filter(id, path, UserField::keyed(key, store_id))
                .await;
        }

        let Some(entity) = self.get_by_id(id).await? else {
            return Ok(UpdateResult::default());
        };
        let field = UserField::new(key, value, store_id);
        if entity.user_field(key, store_id).is_some() {
            self.update_to_set(id, path, UserField::keyed(key, store_id), field)
                .await
        } else {
            self.add_to_set(Target::id(id), path, field).await
        }
    }
}

impl<T: HasUserFields, R: RepositoryExt<T> + ?Sized> UserFieldsExt<T> for R {}
