//! Index provisioning for the span collection.

use std::time::Duration;

use bson::Document;
use mongodb::options::IndexOptions;
use mongodb::IndexModel;
use tracestore_core::{Result, StoreError};
use tracing::info;

use crate::document::fields;
use crate::storage::MongoStorage;

const ASCENDING: i32 = 1;
const DESCENDING: i32 = -1;

fn keys(pairs: &[(&str, i32)]) -> Document {
    let mut keys = Document::new();
    for (field, order) in pairs {
        keys.insert(*field, *order);
    }
    keys
}

/// Indexes backing expiry, trace fetches and the search query shapes.
pub fn span_indexes(span_ttl: Duration) -> Vec<IndexModel> {
    vec![
        IndexModel::builder()
            .keys(keys(&[(fields::START_TIME, ASCENDING)]))
            .options(IndexOptions::builder().expire_after(span_ttl).build())
            .build(),
        IndexModel::builder()
            .keys(keys(&[
                (fields::SERVICE_NAME, ASCENDING),
                (fields::OPERATION_NAME, ASCENDING),
                (fields::START_TIME, DESCENDING),
            ]))
            .build(),
        IndexModel::builder()
            .keys(keys(&[
                (fields::TAGS_KEY, ASCENDING),
                (fields::TAGS_VALUE, ASCENDING),
                (fields::SERVICE_NAME, ASCENDING),
                (fields::OPERATION_NAME, ASCENDING),
                (fields::START_TIME, DESCENDING),
            ]))
            .build(),
        IndexModel::builder()
            .keys(keys(&[(fields::TRACE_ID, ASCENDING)]))
            .build(),
    ]
}

impl MongoStorage {
    /// Creates the span indexes. Re-running with the same TTL is a no-op.
    pub async fn provision_indexes(&self, span_ttl: Duration) -> Result<Vec<String>> {
        let result = self
            .collection()
            .create_indexes(span_indexes(span_ttl), None)
            .await
            .map_err(|e| StoreError::unavailable("error creating span indexes", e))?;
        info!(indexes = ?result.index_names, ttl_seconds = span_ttl.as_secs(), "provisioned span indexes");
        Ok(result.index_names)
    }
}
