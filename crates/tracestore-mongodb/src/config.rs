use std::sync::Arc;
use std::time::Duration;

use bson::Document;
use mongodb::options::{Acknowledgment, ClientOptions, WriteConcern};
use mongodb::Client;
use serde::Deserialize;
use tracestore_core::{Result, StoreError};
use tracing::info;

use crate::reader::MongoSpanReader;
use crate::storage::{MongoStorage, SpanStorage};
use crate::writer::MongoSpanWriter;

const APP_NAME: &str = "tracestore";

/// Connection and retention settings of the span collection.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MongoConfig {
    pub url: String,
    pub database: String,
    pub collection: String,
    /// Bound applied to connection setup and to every store call.
    pub timeout_seconds: u64,
    /// Age after which spans are expired by the store.
    pub span_ttl_seconds: u64,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://localhost:27017".to_string(),
            database: "traces".to_string(),
            collection: "spans".to_string(),
            timeout_seconds: 5,
            span_ttl_seconds: 14 * 24 * 60 * 60,
        }
    }
}

impl MongoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn span_ttl(&self) -> Duration {
        Duration::from_secs(self.span_ttl_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(StoreError::Config("mongodb url must not be empty".into()));
        }
        if self.database.is_empty() {
            return Err(StoreError::Config("database name must not be empty".into()));
        }
        if self.collection.is_empty() {
            return Err(StoreError::Config("collection name must not be empty".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(StoreError::Config("timeout_seconds must be greater than zero".into()));
        }
        if self.span_ttl_seconds == 0 {
            return Err(StoreError::Config("span_ttl_seconds must be greater than zero".into()));
        }
        Ok(())
    }

    /// Opens a client against `url` and returns the span collection gateway.
    /// Writes are acknowledged by a single node.
    pub async fn connect(&self) -> Result<MongoStorage> {
        self.validate()?;
        let mut options = ClientOptions::parse(&self.url)
            .await
            .map_err(|e| StoreError::unavailable("invalid mongodb url", e))?;
        options.app_name = Some(APP_NAME.to_string());
        options.connect_timeout = Some(self.timeout());
        options.server_selection_timeout = Some(self.timeout());
        options.write_concern = Some(WriteConcern::builder().w(Acknowledgment::Nodes(1)).build());

        let client = Client::with_options(options).map_err(|e| StoreError::unavailable("error creating client", e))?;
        let collection = client.database(&self.database).collection::<Document>(&self.collection);
        info!(database = %self.database, collection = %self.collection, "connected to span store");
        Ok(MongoStorage::new(collection))
    }
}

/// Reader and writer sharing one storage gateway.
#[derive(Clone)]
pub struct SpanStore {
    pub reader: MongoSpanReader,
    pub writer: MongoSpanWriter,
}

impl SpanStore {
    pub fn new(storage: Arc<dyn SpanStorage>, config: &MongoConfig) -> Self {
        Self {
            reader: MongoSpanReader::new(storage.clone(), Some(config.timeout())),
            writer: MongoSpanWriter::new(storage),
        }
    }
}
