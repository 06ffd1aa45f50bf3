//! Reassembly of traces from flat span documents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracestore_core::{Result, Trace, TraceId};
use tracing::{debug, error};

use crate::document::decode_span;
use crate::query::build_trace_fetch_filter;
use crate::storage::{cancellable, next_document, FindOptions, SpanStorage};

/// Fetches span documents by trace id and groups the decoded spans.
#[derive(Clone)]
pub struct TraceAssembler {
    storage: Arc<dyn SpanStorage>,
    max_time: Option<Duration>,
}

impl TraceAssembler {
    pub fn new(storage: Arc<dyn SpanStorage>, max_time: Option<Duration>) -> Self {
        Self { storage, max_time }
    }

    /// Groups every span of the requested traces by trace id.
    ///
    /// Spans keep their arrival order within a trace. A single document that
    /// fails to decode fails the whole call: no partial traces are returned.
    pub async fn fetch_and_group(
        &self,
        cancel: &CancellationToken,
        trace_ids: &[String],
    ) -> Result<HashMap<TraceId, Trace>> {
        let mut traces: HashMap<TraceId, Trace> = HashMap::new();
        if trace_ids.is_empty() {
            return Ok(traces);
        }

        let filter = build_trace_fetch_filter(trace_ids);
        let options = FindOptions {
            max_time: self.max_time,
            ..FindOptions::default()
        };
        let mut stream = cancellable(cancel, self.storage.find(filter, options))
            .await
            .map_err(|e| {
                error!(error = %e, "error finding spans by trace id");
                e
            })?;

        let mut decoded = 0usize;
        while let Some(document) = next_document(&mut stream, cancel).await? {
            let span = decode_span(document).map_err(|e| {
                error!(error = %e, "failed to decode span document");
                e
            })?;
            decoded += 1;
            traces
                .entry(span.trace_id)
                .or_insert_with(|| Trace::new(span.trace_id))
                .spans
                .push(span);
        }

        debug!(requested = trace_ids.len(), found = traces.len(), spans = decoded, "assembled traces");
        Ok(traces)
    }

    /// Single-id specialization of [`fetch_and_group`](Self::fetch_and_group).
    /// Returns `None` when no span carries the id.
    pub async fn fetch_one(&self, cancel: &CancellationToken, trace_id: TraceId) -> Result<Option<Trace>> {
        let mut traces = self.fetch_and_group(cancel, &[trace_id.to_string()]).await?;
        Ok(traces.remove(&trace_id))
    }
}
