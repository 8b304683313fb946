use super::ServerState;
use super::error::Result;
use crate::audit::AuditStamp;
use crate::core::RepoError;
use crate::document::apply_instructions;
use crate::entity::{ID_FIELD, document_id, new_id, validate_id};
use crate::filter::FilterExpr;
use crate::networked::wire::{
    CountResponse, DeleteCommand, InsertCommand, InsertResponse, ReplaceCommand, UpdateCommand,
};
use crate::query::QueryPlan;
use crate::repository::{DeleteResult, UpdateResult};
use crate::storage::Collection;
use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};
use tracing::debug;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn insert(
    State(state): State<ServerState>,
    Path(collection): Path<String>,
    Json(command): Json<InsertCommand>,
) -> Result<Json<InsertResponse>> {
    let mut documents = Vec::with_capacity(command.documents.len());
    for mut document in command.documents {
        let Value::Object(fields) = &mut document else {
            return Err(RepoError::validation("documents must be JSON objects").into());
        };
        let supplied = match fields.get(ID_FIELD) {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) if id.is_empty() => None,
            Some(Value::String(id)) => {
                validate_id(id)?;
                Some(id.clone())
            }
            Some(_) => return Err(RepoError::validation("document id must be a string").into()),
        };
        let id = match supplied {
            Some(id) => id,
            None => {
                let id = new_id();
                fields.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };
        documents.push((id, document));
    }

    let inserted = documents.len() as u64;
    state
        .store
        .mutate(&collection, |c| c.insert_batch(documents))
        .await?;
    Ok(Json(InsertResponse { inserted }))
}

pub async fn get_document(
    State(state): State<ServerState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let document = state
        .store
        .read(&collection, |c| c.get(&id).map(|doc| doc.body.clone()))
        .await;
    document
        .map(Json)
        .ok_or_else(|| RepoError::not_found(collection, id).into())
}

pub async fn replace_document(
    State(state): State<ServerState>,
    Path((collection, id)): Path<(String, String)>,
    Json(command): Json<ReplaceCommand>,
) -> Result<Json<Value>> {
    validate_id(&id)?;
    for instruction in &command.on_replace {
        instruction.path.validate()?;
    }
    let stored = state
        .store
        .mutate(&collection, |c| replace_body(c, &collection, &id, command))
        .await?;
    debug!(collection = %collection, id = %id, "document replaced");
    Ok(Json(stored))
}

/// Swaps the body of `id`, keeping its identity and creation stamps.
fn replace_body(collection: &mut Collection, name: &str, id: &str, command: ReplaceCommand) -> crate::core::Result<Value> {
    let ReplaceCommand {
        mut document,
        on_replace,
    } = command;
    let Some(current) = collection.get(id) else {
        return Err(RepoError::not_found(name, id));
    };
    let version = current.version;
    let Value::Object(fields) = &mut document else {
        return Err(RepoError::validation("documents must be JSON objects"));
    };
    match fields.get(ID_FIELD) {
        None => {
            fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        }
        Some(supplied) if supplied.as_str() == Some(id) => {}
        Some(_) => return Err(RepoError::validation("the id field cannot be modified")),
    }
    AuditStamp::preserve_created(&current.body, fields);

    apply_instructions(&mut document, &on_replace)?;
    if document_id(&document) != Some(id) {
        return Err(RepoError::validation("the id field cannot be modified"));
    }
    collection.replace(id, version, document.clone());
    Ok(document)
}

pub async fn delete_document(
    State(state): State<ServerState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<DeleteResult>> {
    let removed = state.store.mutate(&collection, |c| Ok(c.remove(&id))).await?;
    Ok(Json(DeleteResult {
        deleted: u64::from(removed),
    }))
}

pub async fn find(
    State(state): State<ServerState>,
    Path(collection): Path<String>,
    Json(plan): Json<QueryPlan>,
) -> Result<Json<Vec<Value>>> {
    let documents = state
        .store
        .read(&collection, |c| {
            plan.execute(c.scan().into_iter().map(|doc| doc.body))
        })
        .await;
    Ok(Json(documents))
}

pub async fn count(
    State(state): State<ServerState>,
    Path(collection): Path<String>,
    Json(filter): Json<FilterExpr>,
) -> Result<Json<CountResponse>> {
    let count = state
        .store
        .read(&collection, |c| {
            c.scan().iter().filter(|doc| filter.matches(&doc.body)).count() as u64
        })
        .await;
    Ok(Json(CountResponse { count }))
}

pub async fn update(
    State(state): State<ServerState>,
    Path(collection): Path<String>,
    Json(command): Json<UpdateCommand>,
) -> Result<Json<UpdateResult>> {
    if command.update.is_empty() {
        return Err(RepoError::validation("update specification is empty").into());
    }
    for instruction in command.update.iter().chain(&command.on_modified) {
        instruction.path.validate()?;
    }

    let result = state
        .store
        .mutate(&collection, |c| apply_update(c, &command))
        .await?;
    debug!(
        collection = %collection,
        matched = result.matched,
        modified = result.modified,
        "update command applied"
    );
    Ok(Json(result))
}

/// Runs one update command against a locked collection, all or nothing:
/// every new body is computed before the first one is written.
fn apply_update(collection: &mut Collection, command: &UpdateCommand) -> crate::core::Result<UpdateResult> {
    let limit = if command.multi { usize::MAX } else { 1 };
    let targets: Vec<_> = collection
        .scan()
        .into_iter()
        .filter(|doc| command.filter.matches(&doc.body))
        .take(limit)
        .collect();

    let mut result = UpdateResult::default();
    let mut writes = Vec::new();
    for doc in targets {
        result.matched += 1;
        let mut body = doc.body;
        if !apply_instructions(&mut body, &command.update)? {
            continue;
        }
        apply_instructions(&mut body, &command.on_modified)?;
        if document_id(&body) != Some(doc.id.as_str()) {
            return Err(RepoError::validation("the id field cannot be modified"));
        }
        writes.push((doc.id, doc.version, body));
    }

    for (id, version, body) in writes {
        collection.replace(&id, version, body);
        result.modified += 1;
    }
    Ok(result)
}

pub async fn delete_matching(
    State(state): State<ServerState>,
    Path(collection): Path<String>,
    Json(command): Json<DeleteCommand>,
) -> Result<Json<DeleteResult>> {
    let deleted = state
        .store
        .mutate(&collection, |c| {
            let limit = if command.multi { usize::MAX } else { 1 };
            let ids: Vec<String> = c
                .scan()
                .into_iter()
                .filter(|doc| command.filter.matches(&doc.body))
                .take(limit)
                .map(|doc| doc.id)
                .collect();
            Ok(ids.iter().filter(|id| c.remove(id)).count() as u64)
        })
        .await?;
    Ok(Json(DeleteResult { deleted }))
}

pub async fn clear(
    State(state): State<ServerState>,
    Path(collection): Path<String>,
) -> Result<Json<DeleteResult>> {
    let deleted = state.store.mutate(&collection, |c| Ok(c.clear())).await?;
    Ok(Json(DeleteResult { deleted }))
}
