//! JSON bodies exchanged between [`DocumentClient`](super::DocumentClient)
//! and the reference server.
//!
//! Routes, all under `/collections/{name}`:
//!
//! | method   | path                | body              | response          |
//! |----------|---------------------|-------------------|-------------------|
//! | `POST`   | `/insert`           | `InsertCommand`   | `InsertResponse`  |
//! | `GET`    | `/documents/{id}`   |                   | document          |
//! | `PUT`    | `/documents/{id}`   | `ReplaceCommand`  | stored document   |
//! | `DELETE` | `/documents/{id}`   |                   | `DeleteResult`    |
//! | `POST`   | `/find`             | `QueryPlan`       | `[document]`      |
//! | `POST`   | `/count`            | `FilterExpr`      | `CountResponse`   |
//! | `POST`   | `/update`           | `UpdateCommand`   | `UpdateResult`    |
//! | `POST`   | `/delete`           | `DeleteCommand`   | `DeleteResult`    |
//! | `DELETE` | (collection itself) |                   | `DeleteResult`    |
//!
//! Failures answer with an `ErrorResponse` whose `code` is
//! [`RepoError::code`](crate::core::RepoError::code).

use crate::filter::FilterExpr;
use crate::update::Instruction;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertCommand {
    pub documents: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InsertResponse {
    pub inserted: u64,
}

/// One server-side atomic update.
///
/// `update` runs against every matched document (or the first, unless
/// `multi`); `on_modified` runs afterwards only on documents `update`
/// actually changed. The client uses it to carry audit stamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCommand {
    pub filter: FilterExpr,
    pub update: Vec<Instruction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_modified: Vec<Instruction>,
    #[serde(default)]
    pub multi: bool,
}

/// Whole-document replacement. The server keeps the stored `id` and
/// `created_*` fields, then applies `on_replace` (the audit stamps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceCommand {
    pub document: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_replace: Vec<Instruction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCommand {
    pub filter: FilterExpr,
    #[serde(default = "default_multi")]
    pub multi: bool,
}

fn default_multi() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
