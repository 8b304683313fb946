//! "Current actor" resolution for create/update stamping.
//!
//! The provider is injected by the hosting application; the repository core
//! never reaches for ambient request state.

use crate::core::Result;
use crate::entity::{
    BaseEntity, CREATED_BY_FIELD, CREATED_ON_FIELD, Entity, UPDATED_BY_FIELD, UPDATED_ON_FIELD,
    new_id, to_document, validate_id,
};
use crate::update::Instruction;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub type ActorId = String;

pub trait AuditProvider: Send + Sync {
    /// `None` means a system/background operation.
    fn current_actor(&self) -> Option<ActorId>;
}

impl<F> AuditProvider for F
where
    F: Fn() -> Option<ActorId> + Send + Sync,
{
    fn current_actor(&self) -> Option<ActorId> {
        self()
    }
}

/// Provider for headless/background work: never reports an actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemActor;

impl AuditProvider for SystemActor {
    fn current_actor(&self) -> Option<ActorId> {
        None
    }
}

/// Provider that always reports the same actor.
#[derive(Debug, Clone)]
pub struct FixedActor(pub ActorId);

impl FixedActor {
    pub fn new(actor: impl Into<ActorId>) -> Self {
        Self(actor.into())
    }
}

impl AuditProvider for FixedActor {
    fn current_actor(&self) -> Option<ActorId> {
        Some(self.0.clone())
    }
}

/// A resolved (time, actor) pair, taken once per repository call.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditStamp {
    pub at: DateTime<Utc>,
    pub actor: Option<ActorId>,
}

impl AuditStamp {
    pub fn apply_created(&self, base: &mut BaseEntity) {
        base.created_on_utc = self.at;
        base.created_by = self.actor.clone();
    }

    pub fn apply_updated(&self, base: &mut BaseEntity) {
        base.updated_on_utc = Some(self.at);
        base.updated_by = self.actor.clone();
    }

    /// Assigns an id when missing, stamps `created_*` and serializes the
    /// entity. Returns the stored document and the stamped entity.
    pub fn stamp_insert<T: Entity>(&self, mut entity: T) -> Result<(Value, T)> {
        if entity.id().is_empty() {
            entity.base_mut().id = new_id();
        } else {
            validate_id(entity.id())?;
        }
        self.apply_created(entity.base_mut());
        let document = to_document(&entity)?;
        Ok((document, entity))
    }

    /// `$set` instructions writing `updated_*`, for stores updated remotely.
    pub fn updated_instructions(&self) -> Vec<Instruction> {
        vec![
            Instruction::set(UPDATED_ON_FIELD, self.at_value()),
            Instruction::set(UPDATED_BY_FIELD, self.actor_value()),
        ]
    }

    /// Writes `updated_*` directly into a stored document.
    pub fn apply_updated_to_document(&self, document: &mut Map<String, Value>) {
        document.insert(UPDATED_ON_FIELD.to_string(), self.at_value());
        document.insert(UPDATED_BY_FIELD.to_string(), self.actor_value());
    }

    /// Copies `created_*` from `stored` into `document`.
    pub fn preserve_created(stored: &Value, document: &mut Map<String, Value>) {
        for field in [CREATED_ON_FIELD, CREATED_BY_FIELD] {
            match stored.get(field) {
                Some(value) => {
                    document.insert(field.to_string(), value.clone());
                }
                None => {
                    document.remove(field);
                }
            }
        }
    }

    pub fn at_value(&self) -> Value {
        // chrono's serde form, so stamped documents decode back into BaseEntity
        serde_json::to_value(self.at).unwrap_or(Value::Null)
    }

    pub fn actor_value(&self) -> Value {
        self.actor.clone().map(Value::String).unwrap_or(Value::Null)
    }
}

#[derive(Clone)]
pub struct Auditor {
    provider: Arc<dyn AuditProvider>,
}

impl Auditor {
    pub fn new(provider: Arc<dyn AuditProvider>) -> Self {
        Self { provider }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemActor))
    }

    pub fn stamp(&self) -> AuditStamp {
        AuditStamp {
            at: Utc::now(),
            actor: self.provider.current_actor(),
        }
    }
}

impl Default for Auditor {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Auditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auditor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn closures_act_as_providers() {
        let auditor = Auditor::new(Arc::new(|| Some("alice".to_string())));
        assert_eq!(auditor.stamp().actor.as_deref(), Some("alice"));
    }

    #[test]
    fn system_actor_stamps_no_actor() {
        let stamp = Auditor::system().stamp();
        assert_eq!(stamp.actor, None);
        assert_eq!(stamp.actor_value(), Value::Null);
    }

    #[test]
    fn updated_stamp_roundtrips_through_document() {
        let stamp = Auditor::new(Arc::new(FixedActor::new("bob"))).stamp();
        let mut doc = Map::new();
        stamp.apply_updated_to_document(&mut doc);

        let base: BaseEntity = serde_json::from_value(Value::Object(doc)).unwrap();
        assert_eq!(base.updated_by.as_deref(), Some("bob"));
        assert_eq!(base.updated_on_utc, Some(stamp.at));
    }

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Note {
        #[serde(flatten)]
        base: BaseEntity,
        text: String,
    }

    crate::impl_entity!(Note);

    #[test]
    fn insert_stamp_assigns_id_and_created_fields() {
        let stamp = Auditor::new(Arc::new(FixedActor::new("dave"))).stamp();
        let note = Note { base: BaseEntity::default(), text: "hi".into() };
        let (doc, note) = stamp.stamp_insert(note).unwrap();
        assert!(!note.base.id.is_empty());
        assert_eq!(doc["id"], json!(note.base.id));
        assert_eq!(doc["created_by"], json!("dave"));
        assert_eq!(note.base.created_on_utc, stamp.at);

        let blank = Note { base: BaseEntity::with_id("  "), text: String::new() };
        assert!(stamp.stamp_insert(blank).is_err());
    }

    #[test]
    fn preserve_created_restores_stored_values() {
        let stored = json!({"id": "1", "created_on_utc": "2024-01-01T00:00:00Z", "created_by": "carol"});
        let mut doc = json!({"id": "1", "created_on_utc": "2030-01-01T00:00:00Z", "created_by": "mallory"});
        AuditStamp::preserve_created(&stored, doc.as_object_mut().unwrap());
        assert_eq!(doc["created_by"], json!("carol"));
        assert_eq!(doc["created_on_utc"], json!("2024-01-01T00:00:00Z"));
    }
}
