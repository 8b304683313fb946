//! Typed field selection.
//!
//! A [`FieldPath<T, V>`] names a field of type `V` reachable from `T` through
//! plain member access. Paths come from the [`field!`](crate::field) macro
//! (checked by the compiler against the real struct) or from
//! [`FieldPath::parse`], which accepts only dotted identifier chains.
//!
//! Paths that step into array elements are expressed with
//! [`FieldPath::matching`], which pairs the array path with an element
//! predicate; the resolved form carries that predicate as an
//! [`ElementMatch`].

use crate::core::{RepoError, Result};
use crate::filter::{Filter, FilterExpr};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

lazy_static! {
    static ref SEGMENT: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Builds a [`FieldPath`] from a member-access chain.
///
/// ```ignore
/// let name = field!(Product, name);              // FieldPath<Product, String>
/// let city = field!(Customer, address.city);     // FieldPath<Customer, String>
/// ```
#[macro_export]
macro_rules! field {
    ($t:ty, $first:ident $(. $rest:ident)*) => {
        $crate::path::FieldPath::<$t, _>::from_accessor(
            concat!(stringify!($first) $(, ".", stringify!($rest))*),
            |entity: &$t| &entity.$first $(.$rest)*,
        )
    };
}

pub struct FieldPath<T, V> {
    segments: Vec<String>,
    _marker: PhantomData<fn(&T) -> V>,
}

impl<T, V> FieldPath<T, V> {
    /// Used by `field!`; the accessor only pins down `V`.
    #[doc(hidden)]
    pub fn from_accessor<F>(path: &str, _accessor: F) -> Self
    where
        F: for<'a> Fn(&'a T) -> &'a V,
    {
        Self {
            segments: path
                .split('.')
                .map(|segment| segment.trim_start_matches("r#").to_string())
                .collect(),
            _marker: PhantomData,
        }
    }

    /// Parses a dotted path supplied at runtime. The caller vouches for `V`.
    pub fn parse(path: &str) -> Result<Self> {
        let segments = parse_segments(path)?;
        Ok(Self {
            segments,
            _marker: PhantomData,
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }

    /// Continues the path into a nested value object.
    pub fn then<W>(self, child: FieldPath<V, W>) -> FieldPath<T, W> {
        let mut segments = self.segments;
        segments.extend(child.segments);
        FieldPath {
            segments,
            _marker: PhantomData,
        }
    }

    pub fn resolve(&self) -> ResolvedPath {
        ResolvedPath::field(self.dotted())
    }
}

impl<T, E> FieldPath<T, Vec<E>> {
    /// Targets the first element of the array satisfying `filter`.
    pub fn matching(self, filter: Filter<E>) -> ElementSelector<T, E> {
        ElementSelector {
            array: self,
            filter,
            scope: MatchScope::First,
        }
    }

    /// Targets every element of the array satisfying `filter`.
    pub fn matching_all(self, filter: Filter<E>) -> ElementSelector<T, E> {
        ElementSelector {
            array: self,
            filter,
            scope: MatchScope::All,
        }
    }
}

impl<T, V> Clone for FieldPath<T, V> {
    fn clone(&self) -> Self {
        Self {
            segments: self.segments.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, V> fmt::Debug for FieldPath<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldPath").field(&self.dotted()).finish()
    }
}

pub struct ElementSelector<T, E> {
    array: FieldPath<T, Vec<E>>,
    filter: Filter<E>,
    scope: MatchScope,
}

impl<T, E> ElementSelector<T, E> {
    /// Narrows the selection to a field inside the matched element(s).
    pub fn field<X>(self, field: FieldPath<E, X>) -> ElementField<T, X> {
        ElementField {
            resolved: self.resolve_with(field.dotted()),
            _marker: PhantomData,
        }
    }

    pub fn scope(&self) -> MatchScope {
        self.scope
    }

    pub fn array_path(&self) -> String {
        self.array.dotted()
    }

    pub fn element_filter(&self) -> Result<FilterExpr> {
        self.filter.to_expr()
    }

    /// Resolves to the whole matched element.
    pub fn resolve(&self) -> Result<ResolvedPath> {
        self.resolve_with(String::new())
    }

    fn resolve_with(&self, field: String) -> Result<ResolvedPath> {
        Ok(ResolvedPath {
            field,
            element: Some(ElementMatch {
                array: self.array.dotted(),
                filter: self.filter.to_expr()?,
                scope: self.scope,
            }),
        })
    }
}

/// A field inside matched array elements; produced by [`ElementSelector::field`].
pub struct ElementField<T, X> {
    resolved: Result<ResolvedPath>,
    _marker: PhantomData<fn(&T) -> X>,
}

impl<T, X> ElementField<T, X> {
    pub fn resolve(self) -> Result<ResolvedPath> {
        self.resolved
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchScope {
    #[default]
    First,
    All,
}

/// Element-match clause for paths that cross into array elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementMatch {
    pub array: String,
    pub filter: FilterExpr,
    #[serde(default)]
    pub scope: MatchScope,
}

/// Backend-neutral form of a field selector.
///
/// Without `element`, `field` is relative to the document root. With it,
/// `field` is relative to each matched element (empty = the element itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPath {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementMatch>,
}

impl ResolvedPath {
    pub fn field(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            element: None,
        }
    }

    /// Re-checks the grammar; used on paths arriving over the wire.
    pub fn validate(&self) -> Result<()> {
        match &self.element {
            None => {
                parse_segments(&self.field)?;
            }
            Some(element) => {
                parse_segments(&element.array)?;
                if !self.field.is_empty() {
                    parse_segments(&self.field)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.element {
            None => write!(f, "{}", self.field),
            Some(element) => {
                let marker = match element.scope {
                    MatchScope::First => "$",
                    MatchScope::All => "$[]",
                };
                if self.field.is_empty() {
                    write!(f, "{}.{}", element.array, marker)
                } else {
                    write!(f, "{}.{}.{}", element.array, marker, self.field)
                }
            }
        }
    }
}

/// Splits and validates a dotted member-access chain.
pub fn parse_segments(path: &str) -> Result<Vec<String>> {
    if path.trim().is_empty() {
        return Err(RepoError::unsupported_path("empty field path"));
    }
    if path.contains('(') || path.contains(')') {
        return Err(RepoError::unsupported_path(format!(
            "'{}': method calls are not member access",
            path
        )));
    }
    if path.contains('[') || path.contains(']') {
        return Err(RepoError::unsupported_path(format!(
            "'{}': computed indices are not supported",
            path
        )));
    }

    path.split('.')
        .map(|segment| {
            if segment.chars().all(|c| c.is_ascii_digit()) && !segment.is_empty() {
                return Err(RepoError::unsupported_path(format!(
                    "'{}': positional segment '{}' is not supported",
                    path, segment
                )));
            }
            if !SEGMENT.is_match(segment) {
                return Err(RepoError::unsupported_path(format!(
                    "'{}': invalid segment '{}'",
                    path, segment
                )));
            }
            Ok(segment.to_string())
        })
        .collect()
}
