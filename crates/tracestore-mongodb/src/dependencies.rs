//! Service dependency graph derived from child-of span references.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracestore_core::{DependencyLink, DependencyReader, Result, SpanId, SpanRefType, Trace, TraceQueryParameters};
use tracing::{debug, instrument};

use crate::reader::MongoSpanReader;

/// Upper bound on traces loaded for one dependency computation. Callers
/// needing more page by time window.
pub const MAX_TRACES_FOR_DEPENDENCIES: usize = 25_000;

/// Derives parent→child service edges.
///
/// Only child-of references whose target span is present in `traces`
/// contribute. Repeated observations of a pair accumulate into one call
/// count, self-loops are dropped and edges are never transitively closed.
/// Output order is unspecified.
pub fn derive_dependency_links(traces: &[Trace]) -> Vec<DependencyLink> {
    let mut service_by_span: HashMap<SpanId, &str> = HashMap::new();
    for span in traces.iter().flat_map(|t| &t.spans) {
        service_by_span.insert(span.span_id, span.service_name());
    }

    let mut counts: HashMap<(&str, &str), u64> = HashMap::new();
    for span in traces.iter().flat_map(|t| &t.spans) {
        for reference in &span.references {
            if reference.ref_type != SpanRefType::ChildOf {
                continue;
            }
            let Some(&parent) = service_by_span.get(&reference.span_id) else {
                continue;
            };
            if parent.is_empty() {
                continue;
            }
            *counts.entry((parent, span.service_name())).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .filter(|((parent, child), _)| parent != child)
        .map(|((parent, child), call_count)| DependencyLink {
            parent: parent.to_string(),
            child: child.to_string(),
            call_count,
        })
        .collect()
}

#[async_trait]
impl DependencyReader for MongoSpanReader {
    #[instrument(skip(self, cancel))]
    async fn get_dependencies(
        &self,
        cancel: &CancellationToken,
        end_time: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<Vec<DependencyLink>> {
        let start_time = chrono::Duration::from_std(lookback)
            .ok()
            .and_then(|lookback| end_time.checked_sub_signed(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let query = TraceQueryParameters::time_window(start_time, end_time, MAX_TRACES_FOR_DEPENDENCIES);

        let matched = self.query_trace_ids(cancel, &query).await?;
        if matched.is_empty() {
            return Ok(Vec::new());
        }
        let traces = self.traces_in_order(cancel, &matched).await?;
        let links = derive_dependency_links(&traces);
        debug!(traces = traces.len(), links = links.len(), "computed dependencies");
        Ok(links)
    }
}
