//! JSON document access shared by the embedded adapter and the document
//! server: path navigation, value ordering, numeric arithmetic and
//! application of update instructions.

use crate::core::{RepoError, Result};
use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

pub mod apply;

pub use apply::{apply_instructions, apply_instruction};

/// Splits a dotted path; the empty path addresses the value itself.
pub fn split_path(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

/// Plain navigation through nested objects; arrays are not traversed.
pub fn lookup<'a>(doc: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(doc, |current, segment| current.as_object()?.get(*segment))
}

/// Navigation that fans out through arrays met before the last segment.
pub fn lookup_all<'a>(doc: &'a Value, segments: &[&str]) -> Vec<&'a Value> {
    let Some((first, rest)) = segments.split_first() else {
        return vec![doc];
    };
    match doc {
        Value::Object(map) => map
            .get(*first)
            .map(|next| lookup_all(next, rest))
            .unwrap_or_default(),
        Value::Array(items) => items
            .iter()
            .flat_map(|item| lookup_all(item, segments))
            .collect(),
        _ => Vec::new(),
    }
}

pub fn lookup_mut<'a>(doc: &'a mut Value, segments: &[&str]) -> Option<&'a mut Value> {
    segments
        .iter()
        .try_fold(doc, |current, segment| current.as_object_mut()?.get_mut(*segment))
}

/// Returns the slot at `segments`, creating intermediate objects as needed.
/// The slot itself is created as `null` when missing.
pub fn ensure_path<'a>(doc: &'a mut Value, segments: &[&str]) -> Result<&'a mut Value> {
    let mut current = doc;
    for segment in segments {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return Err(RepoError::validation(format!(
                "cannot create field '{}' inside a non-object value",
                segment
            )));
        };
        current = map.entry(segment.to_string()).or_insert(Value::Null);
    }
    Ok(current)
}

/// Ordering between two values of the same kind; `None` for mixed kinds.
///
/// Strings that both parse as RFC 3339 timestamps compare chronologically.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => Some(a.cmp(b)),
        },
        _ => None,
    }
}

/// Total order used for sorting: missing/null, bools, numbers, strings, then
/// structured values (kept in their original relative order).
pub fn sort_cmp(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 4,
        }
    }

    match (left, right) {
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or_else(|| rank(left).cmp(&rank(right))),
        _ => rank(left).cmp(&rank(right)),
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    // cheap pre-check, most strings are not timestamps
    if value.len() < 20 || value.as_bytes().get(4) != Some(&b'-') {
        return None;
    }
    DateTime::parse_from_rfc3339(value).ok()
}

/// `current + amount`, staying integral when both sides are.
pub fn add_numbers(current: &Value, amount: &Number) -> Result<Value> {
    let current = match current {
        Value::Null => return Ok(Value::Number(amount.clone())),
        Value::Number(n) => n,
        other => {
            return Err(RepoError::validation(format!(
                "cannot increment non-numeric value {}",
                other
            )));
        }
    };

    if let (Some(a), Some(b)) = (current.as_i64(), amount.as_i64()) {
        return a
            .checked_add(b)
            .map(|sum| Value::Number(sum.into()))
            .ok_or_else(|| RepoError::validation(format!("integer overflow adding {} to {}", b, a)));
    }

    let (Some(a), Some(b)) = (current.as_f64(), amount.as_f64()) else {
        return Err(RepoError::validation("numeric operand out of range"));
    };
    Number::from_f64(a + b)
        .map(Value::Number)
        .ok_or_else(|| RepoError::validation("increment produced a non-finite number"))
}
