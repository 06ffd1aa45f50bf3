//! In-process span collection evaluating the subset of the MongoDB query
//! language the span store issues: dotted field paths, `$and`, comparison
//! operators, `$in`/`$nin`, `$exists` and `$elemMatch`, plus inclusion
//! projections and multi-key sorts.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use tracestore_core::Result;

use crate::document::fields;
use crate::storage::{DocumentStream, FindOptions, SpanStorage};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    documents: RwLock<Vec<Document>>,
    inserted: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a raw document as-is, bypassing span encoding.
    pub fn insert_raw(&self, mut document: Document) {
        if !document.contains_key(fields::ID) {
            document.insert(fields::ID, ObjectId::new());
        }
        self.documents.write().push(document);
        self.inserted.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Total number of documents inserted over the lifetime of the collection.
    pub fn inserted(&self) -> u64 {
        self.inserted.load(AtomicOrdering::Relaxed)
    }

    fn matching(&self, filter: &Document) -> Vec<Document> {
        self.documents
            .read()
            .iter()
            .filter(|doc| matches_filter(doc, filter))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SpanStorage for MemoryStorage {
    async fn distinct(&self, field: &str, filter: Document, _max_time: Option<Duration>) -> Result<Vec<Bson>> {
        let mut values: Vec<Bson> = Vec::new();
        for doc in self.matching(&filter) {
            let candidates = match lookup(&doc, field) {
                Some(Bson::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };
            for value in candidates {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
        }
        Ok(values)
    }

    async fn find(&self, filter: Document, options: FindOptions) -> Result<DocumentStream> {
        let mut results = self.matching(&filter);
        if let Some(sort) = &options.sort {
            apply_sort(&mut results, sort);
        }
        if let Some(projection) = &options.projection {
            results = results.iter().map(|doc| apply_projection(doc, projection)).collect();
        }
        Ok(stream::iter(results.into_iter().map(Ok)).boxed())
    }

    async fn insert_one(&self, document: Document) -> Result<()> {
        self.insert_raw(document);
        Ok(())
    }
}

/// Resolves a dotted path through embedded documents.
fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, expected)| match key.as_str() {
        "$and" => match expected {
            Bson::Array(clauses) => clauses
                .iter()
                .all(|clause| clause.as_document().map_or(false, |c| matches_filter(doc, c))),
            _ => false,
        },
        "$or" => match expected {
            Bson::Array(clauses) => clauses
                .iter()
                .any(|clause| clause.as_document().map_or(false, |c| matches_filter(doc, c))),
            _ => false,
        },
        path => matches_condition(lookup(doc, path), expected),
    })
}

fn is_operator_document(value: &Bson) -> Option<&Document> {
    match value {
        Bson::Document(d) if d.keys().next().map_or(false, |k| k.starts_with('$')) => Some(d),
        _ => None,
    }
}

fn matches_condition(actual: Option<&Bson>, expected: &Bson) -> bool {
    let Some(ops) = is_operator_document(expected) else {
        return equals(actual, expected);
    };
    ops.iter().all(|(op, val)| match op.as_str() {
        "$eq" => equals(actual, val),
        "$ne" => !equals(actual, val),
        "$gt" => compare(actual, val).map_or(false, |o| o == Ordering::Greater),
        "$gte" => compare(actual, val).map_or(false, |o| o != Ordering::Less),
        "$lt" => compare(actual, val).map_or(false, |o| o == Ordering::Less),
        "$lte" => compare(actual, val).map_or(false, |o| o != Ordering::Greater),
        "$in" => match val {
            Bson::Array(options) => options.iter().any(|option| equals(actual, option)),
            _ => false,
        },
        "$nin" => match val {
            Bson::Array(options) => !options.iter().any(|option| equals(actual, option)),
            _ => false,
        },
        "$exists" => actual.is_some() == val.as_bool().unwrap_or(true),
        "$elemMatch" => match (actual, val) {
            (Some(Bson::Array(items)), Bson::Document(sub)) => items
                .iter()
                .any(|item| item.as_document().map_or(false, |d| matches_filter(d, sub))),
            _ => false,
        },
        _ => false,
    })
}

/// Equality with MongoDB's array semantics: an array field matches when any
/// element does.
fn equals(actual: Option<&Bson>, expected: &Bson) -> bool {
    match actual {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| compare_values(item, expected) == Some(Ordering::Equal))
        }
        Some(value) => value == expected || compare_values(value, expected) == Some(Ordering::Equal),
    }
}

fn compare(actual: Option<&Bson>, expected: &Bson) -> Option<Ordering> {
    compare_values(actual?, expected)
}

fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => (a == b).then_some(Ordering::Equal),
        },
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    }
}

fn apply_projection(doc: &Document, projection: &Document) -> Document {
    let mut result = Document::new();
    let include_id = !matches!(
        projection.get(fields::ID),
        Some(Bson::Int32(0)) | Some(Bson::Int64(0)) | Some(Bson::Boolean(false))
    );
    if include_id {
        if let Some(id) = doc.get(fields::ID) {
            result.insert(fields::ID, id.clone());
        }
    }
    for (key, include) in projection {
        if key == fields::ID {
            continue;
        }
        let included = matches!(include, Bson::Int32(1) | Bson::Int64(1) | Bson::Boolean(true));
        if included {
            if let Some(value) = doc.get(key) {
                result.insert(key.clone(), value.clone());
            }
        }
    }
    result
}

fn apply_sort(docs: &mut [Document], sort: &Document) {
    let keys: Vec<(&str, bool)> = sort
        .iter()
        .map(|(field, order)| (field.as_str(), as_number(order).unwrap_or(1.0) > 0.0))
        .collect();
    docs.sort_by(|a, b| {
        for (field, ascending) in &keys {
            let cmp = match (lookup(a, field), lookup(b, field)) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let cmp = if *ascending { cmp } else { cmp.reverse() };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use futures::TryStreamExt;

    fn span_doc(trace: &str, service: &str, millis: i64, tags: Vec<Document>) -> Document {
        doc! {
            "traceID": trace,
            "startTime": bson::DateTime::from_millis(millis),
            "duration": 10_i64,
            "process": { "serviceName": service },
            "tags": tags,
        }
    }

    async fn collect(storage: &MemoryStorage, filter: Document, options: FindOptions) -> Vec<Document> {
        storage.find(filter, options).await.unwrap().try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_dotted_paths_and_ranges() {
        let storage = MemoryStorage::new();
        storage.insert_raw(span_doc("a", "frontend", 1_000, vec![]));
        storage.insert_raw(span_doc("b", "driver", 2_000, vec![]));
        storage.insert_raw(span_doc("c", "frontend", 3_000, vec![]));

        let filter = doc! {
            "process.serviceName": "frontend",
            "startTime": { "$gt": bson::DateTime::from_millis(1_000), "$lt": bson::DateTime::from_millis(5_000) },
        };
        let found = collect(&storage, filter, FindOptions::default()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("traceID").unwrap(), "c");
    }

    #[tokio::test]
    async fn test_elem_match_requires_same_element() {
        let storage = MemoryStorage::new();
        storage.insert_raw(span_doc(
            "a",
            "svc",
            1,
            vec![doc! { "key": "http.status_code", "value": "200" }, doc! { "key": "error", "value": "true" }],
        ));

        let hit = doc! { "tags": { "$elemMatch": { "key": "error", "value": "true" } } };
        let miss = doc! { "tags": { "$elemMatch": { "key": "error", "value": "200" } } };
        assert_eq!(collect(&storage, hit, FindOptions::default()).await.len(), 1);
        assert!(collect(&storage, miss, FindOptions::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_sort_and_projection() {
        let storage = MemoryStorage::new();
        storage.insert_raw(span_doc("old", "svc", 1, vec![]));
        storage.insert_raw(span_doc("new", "svc", 3, vec![]));
        storage.insert_raw(span_doc("mid", "svc", 2, vec![]));

        let options = FindOptions {
            projection: Some(doc! { "traceID": 1, "_id": 0 }),
            sort: Some(doc! { "startTime": -1 }),
            max_time: None,
        };
        let found = collect(&storage, Document::new(), options).await;
        let ids: Vec<_> = found.iter().map(|d| d.get_str("traceID").unwrap()).collect();
        assert_eq!(ids, ["new", "mid", "old"]);
        assert_eq!(found[0].len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_deduplicates() {
        let storage = MemoryStorage::new();
        storage.insert_raw(span_doc("a", "frontend", 1, vec![]));
        storage.insert_raw(span_doc("b", "driver", 1, vec![]));
        storage.insert_raw(span_doc("c", "frontend", 1, vec![]));

        let services = storage.distinct("process.serviceName", Document::new(), None).await.unwrap();
        assert_eq!(services, vec![Bson::from("frontend"), Bson::from("driver")]);
        assert_eq!(storage.inserted(), 3);
    }
}
