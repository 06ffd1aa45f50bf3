use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::model::{DependencyLink, Span, Trace, TraceId};
use crate::Result;

/// Parameters of a trace search.
///
/// Empty service/operation names and absent (or zero) duration bounds are
/// omitted from the predicate. Every tag entry must be carried by a single
/// matching span.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceQueryParameters {
    pub service_name: String,
    pub operation_name: String,
    pub tags: BTreeMap<String, String>,
    pub start_time_min: DateTime<Utc>,
    pub start_time_max: DateTime<Utc>,
    pub duration_min: Option<Duration>,
    pub duration_max: Option<Duration>,
    pub num_traces: usize,
}

impl TraceQueryParameters {
    /// A query over a time window with no other predicate.
    pub fn time_window(start_time_min: DateTime<Utc>, start_time_max: DateTime<Utc>, num_traces: usize) -> Self {
        Self {
            service_name: String::new(),
            operation_name: String::new(),
            tags: BTreeMap::new(),
            start_time_min,
            start_time_max,
            duration_min: None,
            duration_max: None,
            num_traces,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationQueryParameters {
    pub service_name: String,
    pub span_kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Operation {
    pub name: String,
    pub span_kind: String,
}

/// Read side of a span store.
///
/// Every call observes `cancel`: once it fires the call stops consuming
/// store results and fails with [`StoreError::Cancelled`](crate::StoreError::Cancelled).
#[async_trait]
pub trait SpanReader: Send + Sync {
    async fn get_trace(&self, cancel: &CancellationToken, trace_id: TraceId) -> Result<Trace>;

    async fn get_services(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    async fn get_operations(
        &self,
        cancel: &CancellationToken,
        query: &OperationQueryParameters,
    ) -> Result<Vec<Operation>>;

    /// An empty match is `Ok(vec![])`, never an error.
    async fn find_traces(&self, cancel: &CancellationToken, query: &TraceQueryParameters) -> Result<Vec<Trace>>;

    async fn find_trace_ids(&self, cancel: &CancellationToken, query: &TraceQueryParameters) -> Result<Vec<TraceId>>;
}

#[async_trait]
pub trait SpanWriter: Send + Sync {
    async fn write_span(&self, cancel: &CancellationToken, span: &Span) -> Result<()>;
}

#[async_trait]
pub trait DependencyReader: Send + Sync {
    async fn get_dependencies(
        &self,
        cancel: &CancellationToken,
        end_time: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<Vec<DependencyLink>>;
}
