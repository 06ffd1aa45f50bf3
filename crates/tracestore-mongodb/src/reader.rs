use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use tokio_util::sync::CancellationToken;
use tracestore_core::{
    DecodeError, Operation, OperationQueryParameters, Result, SpanReader, StoreError, Trace, TraceId,
    TraceQueryParameters,
};
use tracing::{debug, error, instrument};

use crate::assembler::TraceAssembler;
use crate::document::fields;
use crate::query::{
    build_operations_filter, build_trace_id_filter, collect_trace_ids, trace_id_find_options, MatchedTraceIds,
};
use crate::storage::{cancellable, SpanStorage};

/// Span reader over a span collection.
#[derive(Clone)]
pub struct MongoSpanReader {
    storage: Arc<dyn SpanStorage>,
    assembler: TraceAssembler,
    max_time: Option<Duration>,
}

impl MongoSpanReader {
    /// `max_time` bounds each store call on the server side.
    pub fn new(storage: Arc<dyn SpanStorage>, max_time: Option<Duration>) -> Self {
        Self {
            assembler: TraceAssembler::new(storage.clone(), max_time),
            storage,
            max_time,
        }
    }

    pub fn assembler(&self) -> &TraceAssembler {
        &self.assembler
    }

    /// Runs the id retrieval step: filtered, newest first, deduplicated and
    /// capped at `num_traces`.
    pub(crate) async fn query_trace_ids(
        &self,
        cancel: &CancellationToken,
        query: &TraceQueryParameters,
    ) -> Result<MatchedTraceIds> {
        if query.num_traces == 0 {
            return Ok(MatchedTraceIds::default());
        }
        let filter = build_trace_id_filter(query);
        debug!(filter = %filter, limit = query.num_traces, "querying trace ids");

        let stream = cancellable(cancel, self.storage.find(filter, trace_id_find_options(self.max_time)))
            .await
            .map_err(|e| {
                error!(error = %e, "error finding trace ids");
                e
            })?;
        collect_trace_ids(stream, query.num_traces, cancel).await
    }

    /// Fetches and assembles the matched traces, returned in match order.
    pub(crate) async fn traces_in_order(
        &self,
        cancel: &CancellationToken,
        matched: &MatchedTraceIds,
    ) -> Result<Vec<Trace>> {
        let mut grouped = self.assembler.fetch_and_group(cancel, &matched.spellings).await?;
        Ok(matched.ids.iter().filter_map(|id| grouped.remove(id)).collect())
    }

    async fn distinct_strings(&self, cancel: &CancellationToken, field: &str, filter: Document) -> Result<Vec<String>> {
        let values = cancellable(cancel, self.storage.distinct(field, filter, self.max_time))
            .await
            .map_err(|e| {
                error!(error = %e, field, "distinct call failed");
                e
            })?;
        values
            .into_iter()
            .map(|value| match value {
                Bson::String(s) => Ok(s),
                _ => Err(StoreError::from(DecodeError::NonStringValue(field.to_string()))),
            })
            .collect()
    }
}

#[async_trait]
impl SpanReader for MongoSpanReader {
    #[instrument(skip(self, cancel, trace_id), fields(trace_id = %trace_id))]
    async fn get_trace(&self, cancel: &CancellationToken, trace_id: TraceId) -> Result<Trace> {
        match self.assembler.fetch_one(cancel, trace_id).await? {
            Some(trace) => Ok(trace),
            None => Err(StoreError::TraceNotFound),
        }
    }

    #[instrument(skip(self, cancel))]
    async fn get_services(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.distinct_strings(cancel, fields::SERVICE_NAME, Document::new()).await
    }

    #[instrument(skip(self, cancel))]
    async fn get_operations(
        &self,
        cancel: &CancellationToken,
        query: &OperationQueryParameters,
    ) -> Result<Vec<Operation>> {
        let filter = build_operations_filter(query);
        let names = self.distinct_strings(cancel, fields::OPERATION_NAME, filter).await?;
        Ok(names
            .into_iter()
            .map(|name| Operation {
                name,
                span_kind: query.span_kind.clone(),
            })
            .collect())
    }

    #[instrument(skip(self, cancel))]
    async fn find_traces(&self, cancel: &CancellationToken, query: &TraceQueryParameters) -> Result<Vec<Trace>> {
        let matched = self.query_trace_ids(cancel, query).await?;
        if matched.is_empty() {
            return Ok(Vec::new());
        }
        self.traces_in_order(cancel, &matched).await
    }

    #[instrument(skip(self, cancel))]
    async fn find_trace_ids(&self, cancel: &CancellationToken, query: &TraceQueryParameters) -> Result<Vec<TraceId>> {
        Ok(self.query_trace_ids(cancel, query).await?.ids)
    }
}
