use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracestore_core::{Result, Span, SpanWriter, StoreError};
use tracing::{error, instrument};

use crate::document::encode_span_document;
use crate::storage::{cancellable, SpanStorage};

/// Persists one span per document. There is no batching or cross-span
/// transaction: a trace becomes visible span by span.
#[derive(Clone)]
pub struct MongoSpanWriter {
    storage: Arc<dyn SpanStorage>,
}

impl MongoSpanWriter {
    pub fn new(storage: Arc<dyn SpanStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl SpanWriter for MongoSpanWriter {
    #[instrument(skip_all, fields(trace_id = %span.trace_id, span_id = %span.span_id))]
    async fn write_span(&self, cancel: &CancellationToken, span: &Span) -> Result<()> {
        let document = encode_span_document(span).map_err(|e| StoreError::Encode(e.to_string()))?;
        cancellable(cancel, self.storage.insert_one(document)).await.map_err(|e| {
            error!(error = %e, "failed to write span");
            e
        })
    }
}
