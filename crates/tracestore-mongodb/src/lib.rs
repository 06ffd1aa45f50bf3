//! MongoDB-backed span storage.
//!
//! Spans are persisted one document per span; traces are reassembled on
//! read and service dependencies are derived from child-of references.

pub mod assembler;
pub mod config;
pub mod dependencies;
pub mod document;
pub mod memory;
pub mod query;
pub mod reader;
pub mod schema;
pub mod storage;
pub mod writer;

pub use assembler::TraceAssembler;
pub use config::{MongoConfig, SpanStore};
pub use dependencies::{derive_dependency_links, MAX_TRACES_FOR_DEPENDENCIES};
pub use document::{decode_span, encode_span, encode_span_document, SpanDocument};
pub use memory::MemoryStorage;
pub use query::{build_trace_fetch_filter, build_trace_id_filter, MatchedTraceIds};
pub use reader::MongoSpanReader;
pub use storage::{DocumentStream, FindOptions, MongoStorage, SpanStorage};
pub use writer::MongoSpanWriter;
