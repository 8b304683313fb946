use super::{add_numbers, ensure_path, lookup_mut, split_path};
use crate::core::{RepoError, Result};
use crate::path::{MatchScope, ResolvedPath};
use crate::update::{Instruction, UpdateOp};
use serde_json::Value;

/// Applies `instructions` in order. Returns whether the document changed.
///
/// On error the document may be partially modified; callers work on a copy.
pub fn apply_instructions(doc: &mut Value, instructions: &[Instruction]) -> Result<bool> {
    let before = doc.clone();
    for instruction in instructions {
        apply_instruction(doc, instruction)?;
    }
    Ok(*doc != before)
}

pub fn apply_instruction(doc: &mut Value, instruction: &Instruction) -> Result<()> {
    let ResolvedPath { field, element } = &instruction.path;
    let Some(element) = element else {
        return apply_op(doc, &split_path(field), &instruction.op);
    };

    let Some(array) = lookup_mut(doc, &split_path(&element.array)) else {
        return Ok(());
    };
    let items = match array {
        Value::Array(items) => items,
        Value::Null => return Ok(()),
        other => {
            return Err(RepoError::validation(format!(
                "'{}' is not an array (found {})",
                element.array,
                kind(other)
            )));
        }
    };

    let segments = split_path(field);
    for item in items.iter_mut() {
        if !element.filter.matches(item) {
            continue;
        }
        apply_op(item, &segments, &instruction.op)?;
        if element.scope == MatchScope::First {
            break;
        }
    }
    Ok(())
}

fn apply_op(target: &mut Value, segments: &[&str], op: &UpdateOp) -> Result<()> {
    match op {
        UpdateOp::Set { value } => {
            if segments.is_empty() && !value.is_object() && target.is_object() {
                return Err(RepoError::validation("cannot replace a document with a non-object"));
            }
            *ensure_path(target, segments)? = value.clone();
        }
        UpdateOp::Inc { amount } => {
            let slot = ensure_path(target, segments)?;
            *slot = add_numbers(slot, amount)?;
        }
        UpdateOp::Push { value } => {
            let slot = ensure_path(target, segments)?;
            if slot.is_null() {
                *slot = Value::Array(Vec::new());
            }
            match slot {
                Value::Array(items) => items.push(value.clone()),
                other => {
                    return Err(RepoError::validation(format!(
                        "cannot push onto {} at '{}'",
                        kind(other),
                        segments.join(".")
                    )));
                }
            }
        }
        UpdateOp::Pull { target: pull } => {
            if let Some(items) = existing_array(target, segments)? {
                items.retain(|item| !pull.matches(item));
            }
        }
        UpdateOp::PullWhere { filter } => {
            if let Some(items) = existing_array(target, segments)? {
                items.retain(|item| !filter.matches(item));
            }
        }
        UpdateOp::SetWhere {
            filter,
            value,
            scope,
        } => {
            if let Some(items) = existing_array(target, segments)? {
                for item in items.iter_mut().filter(|item| filter.matches(item)) {
                    *item = value.clone();
                    if *scope == MatchScope::First {
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

/// The array at `segments`, `None` when the field is absent or null.
fn existing_array<'a>(target: &'a mut Value, segments: &[&str]) -> Result<Option<&'a mut Vec<Value>>> {
    match lookup_mut(target, segments) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(other) => Err(RepoError::validation(format!(
            "'{}' is not an array (found {})",
            segments.join("."),
            kind(other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
