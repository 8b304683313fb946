//! Lazy, restartable queries over one collection.
//!
//! A [`Queryable`] only describes the query (a [`QueryPlan`]); every terminal
//! call (`to_list`, `first`, `count`, ...) executes it again against the
//! current state of the store.

use crate::core::{RepoError, Result};
use crate::document::{self, split_path};
use crate::entity::{Entity, from_document};
use crate::filter::{Filter, FilterExpr};
use crate::path::FieldPath;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub path: String,
    pub direction: SortDirection,
}

/// Backend-neutral query description; also the body of a networked `find`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    #[serde(default)]
    pub filter: FilterExpr,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl QueryPlan {
    pub fn filtered(filter: FilterExpr) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Runs the plan over documents already in memory.
    pub fn execute<I>(&self, documents: I) -> Vec<Value>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut matched: Vec<Value> = documents
            .into_iter()
            .filter(|doc| self.filter.matches(doc))
            .collect();

        if !self.sort.is_empty() {
            matched.sort_by(|a, b| self.compare(a, b));
        }

        let limit = self.limit.unwrap_or(usize::MAX);
        matched.into_iter().skip(self.skip).take(limit).collect()
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for key in &self.sort {
            let segments = split_path(&key.path);
            let ordering = document::sort_cmp(
                document::lookup(a, &segments),
                document::lookup(b, &segments),
            );
            let ordering = match key.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Anything able to run a [`QueryPlan`] against a named collection.
#[async_trait]
pub trait QuerySource: Send + Sync {
    async fn find(&self, collection: &str, plan: &QueryPlan) -> Result<Vec<Value>>;
}

pub struct Queryable<T> {
    source: Arc<dyn QuerySource>,
    plan: QueryPlan,
    invalid: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Queryable<T> {
    pub fn new(source: Arc<dyn QuerySource>) -> Self {
        Self {
            source,
            plan: QueryPlan::default(),
            invalid: None,
            _marker: PhantomData,
        }
    }

    /// Narrows the sequence; successive calls are combined with AND.
    pub fn filter(mut self, filter: Filter<T>) -> Self {
        match filter.into_expr() {
            Ok(expr) => self.plan.filter = std::mem::take(&mut self.plan.filter).and(expr),
            Err(err) => {
                let message = match err {
                    RepoError::Validation(message) => message,
                    other => other.to_string(),
                };
                self.invalid.get_or_insert(message);
            }
        }
        self
    }

    /// Replaces any previous ordering.
    pub fn order_by<V>(mut self, field: FieldPath<T, V>) -> Self {
        self.plan.sort.clear();
        self.then_by_direction(field, SortDirection::Ascending)
    }

    pub fn order_by_desc<V>(mut self, field: FieldPath<T, V>) -> Self {
        self.plan.sort.clear();
        self.then_by_direction(field, SortDirection::Descending)
    }

    pub fn then_by<V>(self, field: FieldPath<T, V>) -> Self {
        self.then_by_direction(field, SortDirection::Ascending)
    }

    pub fn then_by_desc<V>(self, field: FieldPath<T, V>) -> Self {
        self.then_by_direction(field, SortDirection::Descending)
    }

    /// Skips within the current page: after `take(n)`, `skip(k)` leaves at
    /// most `n - k` elements.
    pub fn skip(mut self, count: usize) -> Self {
        self.plan.skip = self.plan.skip.saturating_add(count);
        if let Some(limit) = &mut self.plan.limit {
            *limit = limit.saturating_sub(count);
        }
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.plan.limit = Some(self.plan.limit.map_or(count, |limit| limit.min(count)));
        self
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub async fn to_list(&self) -> Result<Vec<T>> {
        self.fetch(&self.plan)
            .await?
            .into_iter()
            .map(from_document::<T>)
            .collect()
    }

    pub async fn first(&self) -> Result<Option<T>> {
        let mut plan = self.plan.clone();
        plan.limit = Some(plan.limit.map_or(1, |limit| limit.min(1)));
        match self.fetch(&plan).await?.into_iter().next() {
            Some(doc) => from_document::<T>(doc).map(Some),
            None => Ok(None),
        }
    }

    pub async fn count(&self) -> Result<u64> {
        let mut plan = self.plan.clone();
        plan.sort.clear();
        Ok(self.fetch(&plan).await?.len() as u64)
    }

    pub async fn any(&self) -> Result<bool> {
        Ok(self.first().await?.is_some())
    }

    /// Executes on first poll and yields the decoded entities one by one.
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        stream::once(async move { self.to_list().await })
            .flat_map(|result| match result {
                Ok(items) => stream::iter(items.into_iter().map(Ok)).boxed(),
                Err(err) => stream::iter(std::iter::once(Err(err))).boxed(),
            })
            .boxed()
    }

    fn then_by_direction<V>(mut self, field: FieldPath<T, V>, direction: SortDirection) -> Self {
        self.plan.sort.push(SortKey {
            path: field.dotted(),
            direction,
        });
        self
    }

    async fn fetch(&self, plan: &QueryPlan) -> Result<Vec<Value>> {
        if let Some(message) = &self.invalid {
            return Err(RepoError::Validation(message.clone()));
        }
        self.source.find(T::COLLECTION, plan).await
    }
}

impl<T> Clone for Queryable<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            plan: self.plan.clone(),
            invalid: self.invalid.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Queryable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queryable").field("plan", &self.plan).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<Value> {
        vec![
            json!({"id": "1", "name": "b", "rank": 2}),
            json!({"id": "2", "name": "a", "rank": 2}),
            json!({"id": "3", "name": "c"}),
            json!({"id": "4", "name": "d", "rank": 1}),
        ]
    }

    fn ids(values: &[Value]) -> Vec<&str> {
        values.iter().map(|v| v["id"].as_str().unwrap()).collect()
    }

    #[test]
    fn plan_sorts_with_tiebreakers_and_paginates() {
        let plan = QueryPlan {
            sort: vec![
                SortKey { path: "rank".into(), direction: SortDirection::Descending },
                SortKey { path: "name".into(), direction: SortDirection::Ascending },
            ],
            skip: 1,
            limit: Some(2),
            ..QueryPlan::default()
        };
        assert_eq!(ids(&plan.execute(docs())), ["1", "4"]);
    }

    #[test]
    fn unsorted_plan_keeps_source_order() {
        let plan = QueryPlan::filtered(FilterExpr::Exists { path: "rank".into(), exists: true });
        assert_eq!(ids(&plan.execute(docs())), ["1", "2", "4"]);
    }

    #[test]
    fn plan_roundtrips_as_json() {
        let plan = QueryPlan::filtered(FilterExpr::id("x"));
        let wire = serde_json::to_value(&plan).unwrap();
        assert_eq!(wire, json!({"filter": {"op": "eq", "path": "id", "value": "x"}, "skip": 0}));
        let back: QueryPlan = serde_json::from_value(json!({})).unwrap();
        assert_eq!(back, QueryPlan::default());
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Row {
        #[serde(flatten)]
        base: crate::entity::BaseEntity,
        name: String,
    }

    crate::impl_entity!(Row);

    struct Rows(Vec<Value>);

    #[async_trait]
    impl QuerySource for Rows {
        async fn find(&self, _collection: &str, plan: &QueryPlan) -> Result<Vec<Value>> {
            Ok(plan.execute(self.0.clone()))
        }
    }

    async fn names(query: Queryable<Row>) -> Vec<String> {
        query.to_list().await.unwrap().into_iter().map(|row| row.name).collect()
    }

    #[tokio::test]
    async fn skip_and_take_compose_in_either_order() {
        let rows: Vec<Value> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|name| json!({"id": name, "name": name}))
            .collect();
        let query = || Queryable::<Row>::new(Arc::new(Rows(rows.clone())));

        assert_eq!(names(query().take(3).skip(1)).await, ["b", "c"]);
        assert_eq!(names(query().skip(1).take(3)).await, ["b", "c", "d"]);
        assert_eq!(names(query().take(3).skip(1).take(5)).await, ["b", "c"]);
        assert_eq!(names(query().skip(1).skip(1)).await, ["c", "d", "e"]);
        assert!(names(query().take(2).skip(4)).await.is_empty());
    }
}
