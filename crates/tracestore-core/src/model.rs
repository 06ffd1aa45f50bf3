//! Normalized tracing domain model.
//!
//! A [`Trace`] only exists as the result of a query: persistence happens at
//! span granularity and a trace is every span sharing a [`TraceId`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::DecodeError;

/// 128-bit trace identifier shared by all spans of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TraceId {
    pub high: u64,
    pub low: u64,
}

impl TraceId {
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:016x}", self.low)
        } else {
            write!(f, "{:016x}{:016x}", self.high, self.low)
        }
    }
}

impl FromStr for TraceId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 32 {
            return Err(DecodeError::malformed_identifier(s, "trace id exceeds 32 hex digits"));
        }
        // the halves are split at a byte offset
        if !s.is_ascii() {
            return Err(DecodeError::malformed_identifier(s, "non-hex digit"));
        }
        let (high, low) = if s.len() > 16 {
            let split = s.len() - 16;
            (parse_hex_u64(s, &s[..split])?, parse_hex_u64(s, &s[split..])?)
        } else {
            (0, parse_hex_u64(s, s)?)
        };
        Ok(Self { high, low })
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 64-bit span identifier, unique within its trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SpanId(pub u64);

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 16 {
            return Err(DecodeError::malformed_identifier(s, "span id exceeds 16 hex digits"));
        }
        parse_hex_u64(s, s).map(SpanId)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn parse_hex_u64(whole: &str, digits: &str) -> Result<u64, DecodeError> {
    if digits.is_empty() {
        return Err(DecodeError::malformed_identifier(whole, "empty identifier"));
    }
    // from_str_radix tolerates a leading '+', the identifier grammar does not
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::malformed_identifier(whole, "non-hex digit"));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| DecodeError::malformed_identifier(whole, e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanRefType {
    ChildOf,
    FollowsFrom,
}

/// A directed link from the owning span to another span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanRef {
    pub ref_type: SpanRefType,
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

impl SpanRef {
    pub fn child_of(trace_id: TraceId, span_id: SpanId) -> Self {
        Self {
            ref_type: SpanRefType::ChildOf,
            trace_id,
            span_id,
        }
    }

    pub fn follows_from(trace_id: TraceId, span_id: SpanId) -> Self {
        Self {
            ref_type: SpanRefType::FollowsFrom,
            trace_id,
            span_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Bool,
    Int64,
    Float64,
    Binary,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Bool => "bool",
            ValueType::Int64 => "int64",
            ValueType::Float64 => "float64",
            ValueType::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    String(String),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Binary(Vec<u8>),
}

impl TagValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            TagValue::String(_) => ValueType::String,
            TagValue::Bool(_) => ValueType::Bool,
            TagValue::Int64(_) => ValueType::Int64,
            TagValue::Float64(_) => ValueType::Float64,
            TagValue::Binary(_) => ValueType::Binary,
        }
    }

    /// String form used for persistence and tag-equality queries.
    ///
    /// Floats use the shortest representation that parses back to the same
    /// value. Binary values render as lowercase hex.
    pub fn as_string(&self) -> String {
        match self {
            TagValue::String(s) => s.clone(),
            TagValue::Bool(b) => b.to_string(),
            TagValue::Int64(i) => i.to_string(),
            TagValue::Float64(f) => f.to_string(),
            TagValue::Binary(bytes) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }
}

/// A typed key/value annotation on a span, process, or log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: TagValue,
}

impl KeyValue {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: TagValue::String(value.into()),
        }
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self {
            key: key.into(),
            value: TagValue::Bool(value),
        }
    }

    pub fn int64(key: impl Into<String>, value: i64) -> Self {
        Self {
            key: key.into(),
            value: TagValue::Int64(value),
        }
    }

    pub fn float64(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value: TagValue::Float64(value),
        }
    }

    pub fn binary(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: TagValue::Binary(value.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Log {
    pub timestamp: DateTime<Utc>,
    pub fields: Vec<KeyValue>,
}

/// The process emitting a set of spans.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Process {
    pub service_name: String,
    pub tags: Vec<KeyValue>,
}

impl Process {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub operation_name: String,
    pub references: Vec<SpanRef>,
    pub start_time: DateTime<Utc>,
    #[serde(serialize_with = "serialize_micros")]
    pub duration: Duration,
    pub tags: Vec<KeyValue>,
    pub logs: Vec<Log>,
    pub process_id: String,
    pub process: Process,
    pub warnings: Vec<String>,
}

impl Span {
    pub fn service_name(&self) -> &str {
        &self.process.service_name
    }
}

fn serialize_micros<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

/// Spans sharing a trace id, in document arrival order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub trace_id: TraceId,
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn new(trace_id: TraceId) -> Self {
        Self {
            trace_id,
            spans: Vec::new(),
        }
    }
}

/// Aggregated parent-service to child-service call relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DependencyLink {
    pub parent: String,
    pub child: String,
    pub call_count: u64,
}
