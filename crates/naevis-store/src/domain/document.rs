//! Document query model.
//!
//! Documents are JSON objects. A [`Query`] is a conjunction of field
//! equality and numeric lower-bound filters with an optional set-membership
//! filter, an optional
//! descending sort and skip/limit paging. Backends that speak a richer query
//! language translate from this; the in-memory adapter evaluates it directly.

use serde_json::Value;
use std::cmp::Ordering;

/// Collection names used by the musicon routes.
pub mod collections {
    pub const SONGS: &str = "songs";
    pub const ALBUMS: &str = "albums";
    pub const PLAYLISTS: &str = "playlists";
    pub const LIKES: &str = "likes";
}

/// Filter, order and page a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    equals: Vec<(String, Value)>,
    greater_than: Vec<(String, f64)>,
    any_of: Option<(String, Vec<Value>)>,
    sort_desc: Option<String>,
    skip: usize,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    /// Require a numeric `field` strictly above `bound`.
    pub fn gt(mut self, field: impl Into<String>, bound: f64) -> Self {
        self.greater_than.push((field.into(), bound));
        self
    }

    /// Require `field` to equal one of `values`.
    pub fn any_of<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.any_of = Some((field.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    /// Order results by `field`, largest first. Missing fields sort last.
    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort_desc = Some(field.into());
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a single document passes every filter.
    pub fn matches(&self, doc: &Value) -> bool {
        let eq_ok = self
            .equals
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected));
        if !eq_ok {
            return false;
        }
        let gt_ok = self.greater_than.iter().all(|(field, bound)| {
            doc.get(field)
                .and_then(Value::as_f64)
                .is_some_and(|v| v > *bound)
        });
        if !gt_ok {
            return false;
        }
        match &self.any_of {
            Some((field, values)) => doc
                .get(field)
                .map(|v| values.iter().any(|candidate| candidate == v))
                .unwrap_or(false),
            None => true,
        }
    }

    /// Filter, sort and page a candidate set.
    pub fn apply<I>(&self, docs: I) -> Vec<Value>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut selected: Vec<Value> = docs.into_iter().filter(|d| self.matches(d)).collect();

        if let Some(field) = &self.sort_desc {
            selected.sort_by(|a, b| compare_desc(a.get(field), b.get(field)));
        }

        let paged = selected.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => paged.take(limit).collect(),
            None => paged.collect(),
        }
    }
}

fn compare_desc(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_values(b, a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
