//! Translation of trace queries into store filter expressions.

use std::collections::HashSet;
use std::time::Duration;

use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracestore_core::{DecodeError, OperationQueryParameters, Result, TraceId, TraceQueryParameters};

use crate::document::fields;
use crate::storage::{next_document, DocumentStream, FindOptions};

/// Tag carrying the span kind, used by operation lookups.
pub const SPAN_KIND_TAG: &str = "span.kind";

/// Filter selecting spans whose trace should be part of a search result.
///
/// Every tag entry becomes its own `$elemMatch` clause so that key and
/// value must be carried by the same tag; all clauses are conjoined, which
/// pins every requested tag to a single span.
pub fn build_trace_id_filter(query: &TraceQueryParameters) -> Document {
    let mut filter = Document::new();
    filter.insert(
        fields::START_TIME,
        doc! {
            "$gt": to_bson_date(query.start_time_min),
            "$lt": to_bson_date(query.start_time_max),
        },
    );
    if !query.service_name.is_empty() {
        filter.insert(fields::SERVICE_NAME, query.service_name.as_str());
    }
    if !query.operation_name.is_empty() {
        filter.insert(fields::OPERATION_NAME, query.operation_name.as_str());
    }
    if !query.tags.is_empty() {
        let clauses: Vec<Bson> = query
            .tags
            .iter()
            .map(|(key, value)| Bson::Document(tag_match(key, value)))
            .collect();
        filter.insert("$and", clauses);
    }

    let mut duration = Document::new();
    if let Some(max) = non_zero(query.duration_max) {
        duration.insert("$lte", micros(max));
    }
    if let Some(min) = non_zero(query.duration_min) {
        duration.insert("$gte", micros(min));
    }
    if !duration.is_empty() {
        filter.insert(fields::DURATION, duration);
    }
    filter
}

/// Filter fetching every span of the given traces.
pub fn build_trace_fetch_filter(trace_ids: &[String]) -> Document {
    let ids: Vec<Bson> = trace_ids.iter().map(|id| Bson::String(id.clone())).collect();
    let mut filter = Document::new();
    filter.insert(fields::TRACE_ID, doc! { "$in": ids });
    filter
}

/// Projection and ordering for the id retrieval step: only the trace id,
/// most recent spans first.
pub fn trace_id_find_options(max_time: Option<Duration>) -> FindOptions {
    let mut projection = Document::new();
    projection.insert(fields::TRACE_ID, 1);
    projection.insert(fields::ID, 0);
    let mut sort = Document::new();
    sort.insert(fields::START_TIME, -1);
    FindOptions {
        projection: Some(projection),
        sort: Some(sort),
        max_time,
    }
}

/// Filter for `distinct(operationName)`; empty when no service is given.
pub fn build_operations_filter(query: &OperationQueryParameters) -> Document {
    let mut filter = Document::new();
    if query.service_name.is_empty() {
        return filter;
    }
    filter.insert(fields::SERVICE_NAME, query.service_name.as_str());
    if !query.span_kind.is_empty() {
        filter.insert(fields::TAGS, doc! { "$elemMatch": tag_match(SPAN_KIND_TAG, &query.span_kind) });
    }
    filter
}

/// Trace ids matched by the id query, most recent first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchedTraceIds {
    /// Distinct parsed ids, in stream order.
    pub ids: Vec<TraceId>,
    /// Every stored spelling seen for those ids, used to fetch their spans.
    pub spellings: Vec<String>,
}

impl MatchedTraceIds {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Drains the id stream, keeping the first occurrence of each trace id in
/// stream order, and stops as soon as `limit` distinct ids were seen.
///
/// Ids are compared after parsing, so `"ab"` and `"00000000000000ab"` count
/// once while both spellings are kept for the span fetch.
pub async fn collect_trace_ids(
    mut stream: DocumentStream,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<MatchedTraceIds> {
    let mut matched = MatchedTraceIds::default();
    if limit == 0 {
        return Ok(matched);
    }
    let mut seen_ids = HashSet::new();
    let mut seen_spellings = HashSet::new();
    while let Some(document) = next_document(&mut stream, cancel).await? {
        let raw = match document.get(fields::TRACE_ID) {
            Some(Bson::String(id)) => id.clone(),
            _ => return Err(DecodeError::NonStringValue(fields::TRACE_ID.to_string()).into()),
        };
        let trace_id: TraceId = raw.parse()?;
        if seen_spellings.insert(raw.clone()) {
            matched.spellings.push(raw);
        }
        if seen_ids.insert(trace_id) {
            matched.ids.push(trace_id);
            if matched.ids.len() >= limit {
                break;
            }
        }
    }
    Ok(matched)
}

fn tag_match(key: &str, value: &str) -> Document {
    let mut clause = Document::new();
    clause.insert(fields::TAG_KEY, key);
    clause.insert(fields::TAG_VALUE, value);
    clause
}

fn non_zero(duration: Option<Duration>) -> Option<Duration> {
    duration.filter(|d| !d.is_zero())
}

fn micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

pub(crate) fn to_bson_date(time: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(time.timestamp_millis())
}
