pub mod error;
pub mod model;
pub mod spanstore;

pub use error::{BoxError, DecodeError, Result, StoreError};
pub use model::{
    DependencyLink, KeyValue, Log, Process, Span, SpanId, SpanRef, SpanRefType, TagValue, Trace, TraceId,
    ValueType,
};
pub use spanstore::{
    DependencyReader, Operation, OperationQueryParameters, SpanReader, SpanWriter, TraceQueryParameters,
};
