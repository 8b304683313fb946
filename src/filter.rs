//! Predicates over stored documents (and over array elements).
//!
//! [`FilterExpr`] is the backend-neutral form: it is evaluated in-process by
//! the embedded backend and sent verbatim to the networked store. [`Filter<T>`]
//! is the typed front door used by callers.

use crate::core::{RepoError, Result};
use crate::document::{self, split_path};
use crate::entity::ID_FIELD;
use crate::path::FieldPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterExpr {
    #[default]
    All,
    Eq { path: String, value: Value },
    Ne { path: String, value: Value },
    Gt { path: String, value: Value },
    Gte { path: String, value: Value },
    Lt { path: String, value: Value },
    Lte { path: String, value: Value },
    In { path: String, values: Vec<Value> },
    Exists { path: String, exists: bool },
    ElemMatch { path: String, filter: Box<FilterExpr> },
    And { filters: Vec<FilterExpr> },
    Or { filters: Vec<FilterExpr> },
    Not { filter: Box<FilterExpr> },
}

impl FilterExpr {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Eq {
            path: ID_FIELD.to_string(),
            value: Value::String(id.into()),
        }
    }

    pub fn and(self, other: FilterExpr) -> Self {
        match (self, other) {
            (Self::All, other) | (other, Self::All) => other,
            (Self::And { mut filters }, Self::And { filters: more }) => {
                filters.extend(more);
                Self::And { filters }
            }
            (Self::And { mut filters }, other) => {
                filters.push(other);
                Self::And { filters }
            }
            (first, second) => Self::And {
                filters: vec![first, second],
            },
        }
    }

    /// Evaluates the predicate against a document (or an array element).
    ///
    /// Paths traverse arrays implicitly: `lines.sku == "A"` holds when any
    /// element of `lines` has that sku. An empty path names the value itself.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Eq { path, value } => eq_at(doc, path, value),
            Self::Ne { path, value } => !eq_at(doc, path, value),
            Self::Gt { path, value } => cmp_at(doc, path, value, |o| o == Ordering::Greater),
            Self::Gte { path, value } => cmp_at(doc, path, value, |o| o != Ordering::Less),
            Self::Lt { path, value } => cmp_at(doc, path, value, |o| o == Ordering::Less),
            Self::Lte { path, value } => cmp_at(doc, path, value, |o| o != Ordering::Greater),
            Self::In { path, values } => values.iter().any(|value| eq_at(doc, path, value)),
            Self::Exists { path, exists } => {
                let present = document::lookup_all(doc, &split_path(path))
                    .iter()
                    .any(|candidate| !candidate.is_null());
                present == *exists
            }
            Self::ElemMatch { path, filter } => document::lookup_all(doc, &split_path(path))
                .into_iter()
                .filter_map(Value::as_array)
                .flatten()
                .any(|element| filter.matches(element)),
            Self::And { filters } => filters.iter().all(|f| f.matches(doc)),
            Self::Or { filters } => filters.iter().any(|f| f.matches(doc)),
            Self::Not { filter } => !filter.matches(doc),
        }
    }
}

fn eq_at(doc: &Value, path: &str, value: &Value) -> bool {
    let candidates = document::lookup_all(doc, &split_path(path));
    if candidates.is_empty() {
        return value.is_null();
    }
    candidates.into_iter().any(|candidate| {
        candidate == value
            || candidate
                .as_array()
                .is_some_and(|items| items.iter().any(|item| item == value))
    })
}

fn cmp_at(doc: &Value, path: &str, value: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    document::lookup_all(doc, &split_path(path))
        .into_iter()
        .flat_map(|candidate| match candidate {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .any(|candidate| document::compare_values(candidate, value).is_some_and(&accept))
}

/// Typed predicate over `T`.
///
/// Construction never fails; a value that cannot be serialized is reported
/// when the filter is handed to a repository, before any I/O.
pub struct Filter<T> {
    expr: std::result::Result<FilterExpr, String>,
    _marker: PhantomData<fn(&T)>,
}

impl<T> Filter<T> {
    fn wrap(expr: std::result::Result<FilterExpr, String>) -> Self {
        Self {
            expr,
            _marker: PhantomData,
        }
    }

    pub fn from_expr(expr: FilterExpr) -> Self {
        Self::wrap(Ok(expr))
    }

    pub fn all() -> Self {
        Self::from_expr(FilterExpr::All)
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self::from_expr(FilterExpr::id(id))
    }

    pub fn eq<V: Serialize>(field: FieldPath<T, V>, value: impl Into<V>) -> Self {
        Self::compare(field, value.into(), |path, value| FilterExpr::Eq { path, value })
    }

    pub fn ne<V: Serialize>(field: FieldPath<T, V>, value: impl Into<V>) -> Self {
        Self::compare(field, value.into(), |path, value| FilterExpr::Ne { path, value })
    }

    pub fn gt<V: Serialize>(field: FieldPath<T, V>, value: impl Into<V>) -> Self {
        Self::compare(field, value.into(), |path, value| FilterExpr::Gt { path, value })
    }

    pub fn gte<V: Serialize>(field: FieldPath<T, V>, value: impl Into<V>) -> Self {
        Self::compare(field, value.into(), |path, value| FilterExpr::Gte { path, value })
    }

    pub fn lt<V: Serialize>(field: FieldPath<T, V>, value: impl Into<V>) -> Self {
        Self::compare(field, value.into(), |path, value| FilterExpr::Lt { path, value })
    }

    pub fn lte<V: Serialize>(field: FieldPath<T, V>, value: impl Into<V>) -> Self {
        Self::compare(field, value.into(), |path, value| FilterExpr::Lte { path, value })
    }

    pub fn in_list<V: Serialize>(field: FieldPath<T, V>, values: impl IntoIterator<Item = V>) -> Self {
        let values: std::result::Result<Vec<Value>, String> = values
            .into_iter()
            .map(|value| serde_json::to_value(value).map_err(|e| e.to_string()))
            .collect();
        Self::wrap(values.map(|values| FilterExpr::In {
            path: field.dotted(),
            values,
        }))
    }

    pub fn exists<V>(field: FieldPath<T, V>, exists: bool) -> Self {
        Self::from_expr(FilterExpr::Exists {
            path: field.dotted(),
            exists,
        })
    }

    /// Array field contains an element equal to `item`.
    pub fn contains<E: Serialize>(field: FieldPath<T, Vec<E>>, item: E) -> Self {
        Self::wrap(
            serde_json::to_value(item)
                .map(|value| FilterExpr::Eq {
                    path: field.dotted(),
                    value,
                })
                .map_err(|e| e.to_string()),
        )
    }

    /// Array field has at least one element satisfying `filter`.
    pub fn any<E>(field: FieldPath<T, Vec<E>>, filter: Filter<E>) -> Self {
        Self::wrap(filter.expr.map(|inner| FilterExpr::ElemMatch {
            path: field.dotted(),
            filter: Box::new(inner),
        }))
    }

    /// Compares the value itself; meant for arrays of scalars.
    pub fn value_eq(value: T) -> Self
    where
        T: Serialize,
    {
        Self::wrap(
            serde_json::to_value(value)
                .map(|value| FilterExpr::Eq {
                    path: String::new(),
                    value,
                })
                .map_err(|e| e.to_string()),
        )
    }

    pub fn and(self, other: Filter<T>) -> Self {
        Self::wrap(match (self.expr, other.expr) {
            (Ok(left), Ok(right)) => Ok(left.and(right)),
            (Err(e), _) | (_, Err(e)) => Err(e),
        })
    }

    pub fn or(self, other: Filter<T>) -> Self {
        Self::wrap(match (self.expr, other.expr) {
            (Ok(FilterExpr::Or { mut filters }), Ok(right)) => {
                filters.push(right);
                Ok(FilterExpr::Or { filters })
            }
            (Ok(left), Ok(right)) => Ok(FilterExpr::Or {
                filters: vec![left, right],
            }),
            (Err(e), _) | (_, Err(e)) => Err(e),
        })
    }

    pub fn not(self) -> Self {
        Self::wrap(self.expr.map(|inner| FilterExpr::Not {
            filter: Box::new(inner),
        }))
    }

    pub fn to_expr(&self) -> Result<FilterExpr> {
        self.expr
            .clone()
            .map_err(|e| RepoError::validation(format!("filter value is not serializable: {}", e)))
    }

    pub fn into_expr(self) -> Result<FilterExpr> {
        self.expr
            .map_err(|e| RepoError::validation(format!("filter value is not serializable: {}", e)))
    }

    fn compare<V: Serialize>(
        field: FieldPath<T, V>,
        value: V,
        build: impl FnOnce(String, Value) -> FilterExpr,
    ) -> Self {
        Self::wrap(
            serde_json::to_value(value)
                .map(|value| build(field.dotted(), value))
                .map_err(|e| e.to_string()),
        )
    }
}

impl<T> Clone for Filter<T> {
    fn clone(&self) -> Self {
        Self::wrap(self.expr.clone())
    }
}

impl<T> fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Filter").field(&self.expr).finish()
    }
}
