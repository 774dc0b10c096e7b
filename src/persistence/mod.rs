//! Document persistence.
//!
//! The services only rely on a small document-store surface: find, count,
//! insert, update and remove over JSON documents. [`CappedCollection`] is the
//! sled-backed implementation used by the log store writer.

pub mod sled_store;

pub use sled_store::{CappedCollection, DEFAULT_CAPACITY};

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;

/// A stored document
pub type Document = serde_json::Map<String, Value>;

/// Field holding the store-assigned document id
pub const ID_FIELD: &str = "_id";

/// Field-equality predicate. An empty query matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    equals: Document,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.equals
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Ordering applied to `find` results
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }

    pub(crate) fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ordering = compare_values(a.get(&self.field), b.get(&self.field));
        match self.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

// Missing fields sort first; mixed types fall back to their JSON text.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Document store operations
#[async_trait]
pub trait Repository: Send + Sync {
    /// Documents matching `query`, in insertion order unless `sort` is given
    async fn find(&self, query: &Query, sort: Option<&Sort>) -> Result<Vec<Document>>;

    /// Number of documents matching `query`
    async fn count(&self, query: &Query) -> Result<u64>;

    /// Store `doc` and return it with its assigned id
    async fn insert(&self, doc: Document) -> Result<Document>;

    /// Merge `changes` into every matching document; returns how many changed
    async fn update(&self, changes: &Document, query: &Query) -> Result<u64>;

    /// Delete every matching document; returns how many were removed
    async fn remove(&self, query: &Query) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_query_matching() {
        let record = doc(json!({"level": "error", "meta": {"code": 500}}));
        assert!(Query::all().matches(&record));
        assert!(Query::eq("level", "error").matches(&record));
        assert!(!Query::eq("level", "error").and("message", "x").matches(&record));
        assert!(Query::eq("meta", json!({"code": 500})).matches(&record));
    }

    #[test]
    fn test_sort_handles_missing_and_numbers() {
        let a = doc(json!({"status": 200}));
        let b = doc(json!({"status": 404}));
        let none = doc(json!({}));

        let asc = Sort::ascending("status");
        assert_eq!(asc.compare(&a, &b), Ordering::Less);
        assert_eq!(asc.compare(&none, &a), Ordering::Less);
        assert_eq!(Sort::descending("status").compare(&a, &b), Ordering::Greater);
    }
}
