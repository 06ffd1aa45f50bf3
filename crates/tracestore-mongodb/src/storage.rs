//! Storage gateway: the find/distinct/insert seam between the span store
//! logic and the document store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::{BoxStream, StreamExt};
use mongodb::options::{DistinctOptions, FindOptions as DriverFindOptions};
use mongodb::Collection;
use tokio_util::sync::CancellationToken;
use tracestore_core::{Result, StoreError};

/// Lazily consumed query results. Dropping the stream releases the cursor.
pub type DocumentStream = BoxStream<'static, Result<Document>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    /// Store-side time bound for the whole cursor.
    pub max_time: Option<Duration>,
}

/// Operations consumed from the document store. Implementations forward to
/// the store and surface its errors unchanged as
/// [`StoreError::StoreUnavailable`].
#[async_trait]
pub trait SpanStorage: Send + Sync {
    async fn distinct(&self, field: &str, filter: Document, max_time: Option<Duration>) -> Result<Vec<Bson>>;

    async fn find(&self, filter: Document, options: FindOptions) -> Result<DocumentStream>;

    async fn insert_one(&self, document: Document) -> Result<()>;
}

/// Gateway over a MongoDB collection.
#[derive(Clone, Debug)]
pub struct MongoStorage {
    collection: Collection<Document>,
}

impl MongoStorage {
    pub fn new(collection: Collection<Document>) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }
}

#[async_trait]
impl SpanStorage for MongoStorage {
    async fn distinct(&self, field: &str, filter: Document, max_time: Option<Duration>) -> Result<Vec<Bson>> {
        let options = DistinctOptions::builder().max_time(max_time).build();
        self.collection
            .distinct(field, filter, options)
            .await
            .map_err(|e| StoreError::unavailable(format!("distinct call on {} failed", field), e))
    }

    async fn find(&self, filter: Document, options: FindOptions) -> Result<DocumentStream> {
        let driver_options = DriverFindOptions::builder()
            .projection(options.projection)
            .sort(options.sort)
            .max_time(options.max_time)
            .build();
        let cursor = self
            .collection
            .find(filter, driver_options)
            .await
            .map_err(|e| StoreError::unavailable("error finding spans", e))?;

        Ok(cursor
            .map(|doc| doc.map_err(|e| StoreError::unavailable("error reading span cursor", e)))
            .boxed())
    }

    async fn insert_one(&self, document: Document) -> Result<()> {
        self.collection
            .insert_one(document, None)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::unavailable("error inserting span", e))
    }
}

/// Pulls the next document unless `cancel` fires first.
pub(crate) async fn next_document(stream: &mut DocumentStream, cancel: &CancellationToken) -> Result<Option<Document>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        next = stream.next() => next.transpose(),
    }
}

/// Races a single store call against `cancel`.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        result = call => result,
    }
}
