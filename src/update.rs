//! Backend-neutral update specifications.
//!
//! [`UpdateBuilder`] accumulates `(path, op, value)` instructions and
//! produces an immutable [`UpdateSpec`]. Both backends consume the same spec:
//! the networked adapter ships it as native operators, the embedded adapter
//! applies it to an in-memory copy of each document.

use crate::core::{RepoError, Result};
use crate::document::split_path;
use crate::filter::{Filter, FilterExpr};
use crate::path::{ElementField, ElementSelector, FieldPath, MatchScope, ResolvedPath};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use std::marker::PhantomData;

/// Identifies array elements removed by `$pull`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum PullTarget {
    /// Elements equal to `value`.
    Value { value: Value },
    /// Elements whose `field` equals `value` (primary-key removal).
    Key { field: String, value: Value },
}

impl PullTarget {
    pub fn matches(&self, element: &Value) -> bool {
        match self {
            Self::Value { value } => element == value,
            Self::Key { field, value } => {
                crate::document::lookup(element, &split_path(field)) == Some(value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateOp {
    #[serde(rename = "$set")]
    Set { value: Value },
    #[serde(rename = "$inc")]
    Inc { amount: Number },
    #[serde(rename = "$push")]
    Push { value: Value },
    #[serde(rename = "$pull")]
    Pull { target: PullTarget },
    #[serde(rename = "$pullWhere")]
    PullWhere { filter: FilterExpr },
    #[serde(rename = "$setWhere")]
    SetWhere {
        filter: FilterExpr,
        value: Value,
        #[serde(default)]
        scope: MatchScope,
    },
}

impl UpdateOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Set { .. } => "$set",
            Self::Inc { .. } => "$inc",
            Self::Push { .. } => "$push",
            Self::Pull { .. } => "$pull",
            Self::PullWhere { .. } => "$pullWhere",
            Self::SetWhere { .. } => "$setWhere",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub path: ResolvedPath,
    pub op: UpdateOp,
}

impl Instruction {
    pub fn new(path: ResolvedPath, op: UpdateOp) -> Self {
        Self { path, op }
    }

    pub fn set(field: impl Into<String>, value: Value) -> Self {
        Self::new(ResolvedPath::field(field), UpdateOp::Set { value })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.name(), self.path)
    }
}

/// Numeric field types accepted by `inc`.
pub trait Numeric: Copy {
    fn to_number(self) -> Option<Number>;
}

macro_rules! numeric_int {
    ($($ty:ty),*) => {
        $(impl Numeric for $ty {
            fn to_number(self) -> Option<Number> {
                Some(Number::from(self))
            }
        })*
    };
}

numeric_int!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

impl Numeric for f32 {
    fn to_number(self) -> Option<Number> {
        Number::from_f64(f64::from(self))
    }
}

impl Numeric for f64 {
    fn to_number(self) -> Option<Number> {
        Number::from_f64(self)
    }
}

/// Immutable, ordered list of instructions targeting documents of `T`.
pub struct UpdateSpec<T> {
    instructions: Vec<Instruction>,
    _marker: PhantomData<fn(&T)>,
}

impl<T> UpdateSpec<T> {
    pub fn builder() -> UpdateBuilder<T> {
        UpdateBuilder::new()
    }

    /// Wraps raw instructions, re-checking their paths.
    pub fn from_instructions(instructions: Vec<Instruction>) -> Result<Self> {
        if instructions.is_empty() {
            return Err(RepoError::validation("update specification is empty"));
        }
        for instruction in &instructions {
            instruction.path.validate()?;
        }
        Ok(Self {
            instructions,
            _marker: PhantomData,
        })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl<T> Clone for UpdateSpec<T> {
    fn clone(&self) -> Self {
        Self {
            instructions: self.instructions.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for UpdateSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.instructions.iter().map(|i| i.to_string())).finish()
    }
}

/// Fluent accumulator for [`UpdateSpec`].
///
/// Errors (unserializable values, non-finite increments, bad element
/// filters) are held until [`build`](Self::build), which reports the first.
pub struct UpdateBuilder<T> {
    instructions: Vec<Instruction>,
    error: Option<RepoError>,
    _marker: PhantomData<fn(&T)>,
}

impl<T> Default for UpdateBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UpdateBuilder<T> {
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
            error: None,
            _marker: PhantomData,
        }
    }

    pub fn set<V: Serialize>(self, field: FieldPath<T, V>, value: impl Into<V>) -> Self {
        let path = field.resolve();
        let value: V = value.into();
        self.push_value(Ok(path), &value, |value| UpdateOp::Set { value })
    }

    /// Sets a field inside matched array element(s).
    pub fn set_element<X: Serialize>(self, field: ElementField<T, X>, value: impl Into<X>) -> Self {
        let value: X = value.into();
        self.push_value(field.resolve(), &value, |value| UpdateOp::Set { value })
    }

    pub fn inc<V: Numeric>(self, field: FieldPath<T, V>, amount: V) -> Self {
        let path = field.resolve();
        self.push_amount(Ok(path), amount)
    }

    pub fn inc_element<X: Numeric>(self, field: ElementField<T, X>, amount: X) -> Self {
        self.push_amount(field.resolve(), amount)
    }

    /// Appends `item` to an array field.
    pub fn push<E: Serialize>(self, field: FieldPath<T, Vec<E>>, item: E) -> Self {
        let path = field.resolve();
        self.push_value(Ok(path), &item, |value| UpdateOp::Push { value })
    }

    /// Removes every element equal to `item`.
    pub fn pull<E: Serialize>(self, field: FieldPath<T, Vec<E>>, item: E) -> Self {
        let path = field.resolve();
        self.push_value(Ok(path), &item, |value| UpdateOp::Pull {
            target: PullTarget::Value { value },
        })
    }

    /// Removes every element whose `key` field equals `value`.
    pub fn pull_by_key<E, K: Serialize>(
        self,
        field: FieldPath<T, Vec<E>>,
        key: FieldPath<E, K>,
        value: impl Into<K>,
    ) -> Self {
        let path = field.resolve();
        let key = key.dotted();
        let value: K = value.into();
        self.push_value(Ok(path), &value, move |value| UpdateOp::Pull {
            target: PullTarget::Key { field: key, value },
        })
    }

    /// Removes every element satisfying `filter`.
    pub fn pull_where<E>(mut self, field: FieldPath<T, Vec<E>>, filter: Filter<E>) -> Self {
        match filter.into_expr() {
            Ok(filter) => self
                .instructions
                .push(Instruction::new(field.resolve(), UpdateOp::PullWhere { filter })),
            Err(err) => self.record(err),
        }
        self
    }

    /// Replaces the element(s) picked by `selector` with `item`.
    pub fn set_where<E: Serialize>(mut self, selector: ElementSelector<T, E>, item: E) -> Self {
        let filter = match selector.element_filter() {
            Ok(filter) => filter,
            Err(err) => {
                self.record(err);
                return self;
            }
        };
        let path = ResolvedPath::field(selector.array_path());
        let scope = selector.scope();
        self.push_value(Ok(path), &item, move |value| UpdateOp::SetWhere {
            filter,
            value,
            scope,
        })
    }

    pub fn build(self) -> Result<UpdateSpec<T>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.instructions.is_empty() {
            return Err(RepoError::validation("update specification is empty"));
        }
        Ok(UpdateSpec {
            instructions: self.instructions,
            _marker: PhantomData,
        })
    }

    fn push_value<V: Serialize + ?Sized>(
        mut self,
        path: Result<ResolvedPath>,
        value: &V,
        op: impl FnOnce(Value) -> UpdateOp,
    ) -> Self {
        let value = serde_json::to_value(value)
            .map_err(|e| RepoError::validation(format!("update value is not serializable: {}", e)));
        match (path, value) {
            (Ok(path), Ok(value)) => self.instructions.push(Instruction::new(path, op(value))),
            (Err(err), _) | (_, Err(err)) => self.record(err),
        }
        self
    }

    fn push_amount<V: Numeric>(mut self, path: Result<ResolvedPath>, amount: V) -> Self {
        let amount = amount
            .to_number()
            .ok_or_else(|| RepoError::validation("increment amount must be finite"));
        match (path, amount) {
            (Ok(path), Ok(amount)) => self
                .instructions
                .push(Instruction::new(path, UpdateOp::Inc { amount })),
            (Err(err), _) | (_, Err(err)) => self.record(err),
        }
        self
    }

    fn record(&mut self, err: RepoError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field;
    use serde_json::json;

    #[derive(Serialize)]
    #[allow(dead_code)]
    struct Line {
        sku: String,
        qty: i64,
    }

    #[allow(dead_code)]
    struct Order {
        name: String,
        views: i64,
        rating: f64,
        lines: Vec<Line>,
        tags: Vec<String>,
    }

    #[test]
    fn builder_keeps_instruction_order() {
        let spec = UpdateSpec::<Order>::builder()
            .set(field!(Order, name), "renamed")
            .inc(field!(Order, views), 1)
            .push(field!(Order, tags), "new".to_string())
            .build()
            .unwrap();

        let ops: Vec<_> = spec.instructions().iter().map(|i| i.op.name()).collect();
        assert_eq!(ops, ["$set", "$inc", "$push"]);
        assert_eq!(spec.instructions()[0].op, UpdateOp::Set { value: json!("renamed") });
    }

    #[test]
    fn empty_builder_is_rejected() {
        let err = UpdateBuilder::<Order>::new().build().unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
    }

    #[test]
    fn non_finite_increment_fails_at_build() {
        let err = UpdateBuilder::<Order>::new()
            .inc(field!(Order, rating), f64::NAN)
            .set(field!(Order, name), "x")
            .build()
            .unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
    }

    #[test]
    fn element_instructions_carry_match() {
        let spec = UpdateBuilder::<Order>::new()
            .set_element(
                field!(Order, lines)
                    .matching(Filter::eq(field!(Line, sku), "A"))
                    .field(field!(Line, qty)),
                5,
            )
            .set_where(
                field!(Order, lines).matching_all(Filter::eq(field!(Line, qty), 0)),
                Line { sku: "Z".into(), qty: 1 },
            )
            .pull_by_key(field!(Order, lines), field!(Line, sku), "B")
            .build()
            .unwrap();

        let first = &spec.instructions()[0];
        assert_eq!(first.path.to_string(), "lines.$.qty");

        match &spec.instructions()[1].op {
            UpdateOp::SetWhere { scope, value, .. } => {
                assert_eq!(*scope, MatchScope::All);
                assert_eq!(value, &json!({"sku": "Z", "qty": 1}));
            }
            other => panic!("unexpected op {other:?}"),
        }

        match &spec.instructions()[2].op {
            UpdateOp::Pull { target } => {
                assert!(target.matches(&json!({"sku": "B", "qty": 9})));
                assert!(!target.matches(&json!({"sku": "C"})));
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn operators_use_native_names_on_the_wire() {
        let instruction = Instruction::set("name", json!("x"));
        assert_eq!(
            serde_json::to_value(&instruction).unwrap(),
            json!({"path": {"field": "name"}, "op": {"$set": {"value": "x"}}})
        );
        let back: Instruction = serde_json::from_value(json!({
            "path": {"field": "views"},
            "op": {"$inc": {"amount": 2}}
        }))
        .unwrap();
        assert_eq!(back.op, UpdateOp::Inc { amount: Number::from(2) });
    }

    #[test]
    fn from_instructions_rechecks_paths() {
        let err = UpdateSpec::<Order>::from_instructions(vec![Instruction::set("lines[0]", json!(1))])
            .unwrap_err();
        assert!(matches!(err, RepoError::UnsupportedPath(_)));
    }
}
