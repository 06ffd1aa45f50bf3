//! Flat per-span document representation and its mapping to the domain model.

use std::time::Duration;

use bson::{Bson, Document};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracestore_core::{
    DecodeError, KeyValue, Log, Process, Span, SpanId, SpanRef, SpanRefType, TagValue, TraceId, ValueType,
};

/// Persisted field names, shared with the query translator and index provisioning.
pub mod fields {
    pub const ID: &str = "_id";
    pub const TRACE_ID: &str = "traceID";
    pub const SPAN_ID: &str = "spanID";
    pub const OPERATION_NAME: &str = "operationName";
    pub const START_TIME: &str = "startTime";
    pub const DURATION: &str = "duration";
    pub const TAGS: &str = "tags";
    pub const TAG_KEY: &str = "key";
    pub const TAG_VALUE: &str = "value";
    pub const TAGS_KEY: &str = "tags.key";
    pub const TAGS_VALUE: &str = "tags.value";
    pub const SERVICE_NAME: &str = "process.serviceName";
}

const CHILD_OF: &str = "CHILD_OF";
const FOLLOWS_FROM: &str = "FOLLOWS_FROM";

/// Document representation of a domain span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanDocument {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
    #[serde(rename = "operationName")]
    pub operation_name: String,
    #[serde(rename = "startTime")]
    pub start_time: bson::DateTime,
    /// Microseconds.
    pub duration: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub references: Vec<ReferenceDocument>,
    #[serde(rename = "processID", default)]
    pub process_id: String,
    #[serde(default)]
    pub process: ProcessDocument,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<KeyValueDocument>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub logs: Vec<LogDocument>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDocument {
    #[serde(rename = "refType")]
    pub ref_type: String,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessDocument {
    #[serde(rename = "serviceName", default)]
    pub service_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<KeyValueDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogDocument {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub fields: Vec<KeyValueDocument>,
}

/// Tag with its value always persisted in string form next to the declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValueDocument {
    pub key: String,
    #[serde(rename = "type", default)]
    pub value_type: String,
    #[serde(default)]
    pub value: Option<Bson>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Maps a domain span to its document. Binary tags are not persisted.
pub fn encode_span(span: &Span) -> SpanDocument {
    SpanDocument {
        trace_id: span.trace_id.to_string(),
        span_id: span.span_id.to_string(),
        operation_name: span.operation_name.clone(),
        start_time: bson::DateTime::from_millis(span.start_time.timestamp_millis()),
        duration: i64::try_from(span.duration.as_micros()).unwrap_or(i64::MAX),
        references: span.references.iter().map(encode_reference).collect(),
        process_id: span.process_id.clone(),
        process: ProcessDocument {
            service_name: span.process.service_name.clone(),
            tags: encode_key_values(&span.process.tags),
        },
        tags: encode_key_values(&span.tags),
        logs: span
            .logs
            .iter()
            .map(|log| LogDocument {
                timestamp: log.timestamp.timestamp_millis(),
                fields: encode_key_values(&log.fields),
            })
            .collect(),
        warnings: span.warnings.clone(),
    }
}

/// [`encode_span`] rendered as a BSON document ready for insertion.
pub fn encode_span_document(span: &Span) -> Result<Document, bson::ser::Error> {
    bson::to_document(&encode_span(span))
}

fn encode_reference(reference: &SpanRef) -> ReferenceDocument {
    let ref_type = match reference.ref_type {
        SpanRefType::ChildOf => CHILD_OF,
        SpanRefType::FollowsFrom => FOLLOWS_FROM,
    };
    ReferenceDocument {
        ref_type: ref_type.to_string(),
        trace_id: reference.trace_id.to_string(),
        span_id: reference.span_id.to_string(),
    }
}

fn encode_key_values(key_values: &[KeyValue]) -> Vec<KeyValueDocument> {
    key_values
        .iter()
        .filter(|kv| kv.value.value_type() != ValueType::Binary)
        .map(|kv| KeyValueDocument {
            key: kv.key.clone(),
            value_type: kv.value.value_type().as_str().to_string(),
            value: Some(Bson::String(kv.value.as_string())),
        })
        .collect()
}

/// Decodes a raw stored document.
pub fn decode_span(document: Document) -> Result<Span, DecodeError> {
    let raw: SpanDocument =
        bson::from_document(document).map_err(|e| DecodeError::MalformedDocument(e.to_string()))?;
    raw.try_into()
}

impl TryFrom<SpanDocument> for Span {
    type Error = DecodeError;

    fn try_from(doc: SpanDocument) -> Result<Self, Self::Error> {
        let trace_id: TraceId = doc.trace_id.parse()?;
        let span_id: SpanId = doc.span_id.parse()?;
        let duration = u64::try_from(doc.duration)
            .map(Duration::from_micros)
            .map_err(|_| DecodeError::MalformedDocument(format!("negative duration {}", doc.duration)))?;

        Ok(Span {
            trace_id,
            span_id,
            operation_name: doc.operation_name,
            references: decode_references(doc.references)?,
            start_time: from_millis(doc.start_time.timestamp_millis())?,
            duration,
            tags: decode_key_values(doc.tags)?,
            logs: decode_logs(doc.logs)?,
            process_id: doc.process_id,
            process: Process {
                service_name: doc.process.service_name,
                tags: decode_key_values(doc.process.tags)?,
            },
            warnings: doc.warnings,
        })
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, DecodeError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| DecodeError::MalformedDocument(format!("timestamp {} out of range", millis)))
}

fn decode_references(references: Vec<ReferenceDocument>) -> Result<Vec<SpanRef>, DecodeError> {
    references
        .into_iter()
        .map(|r| {
            let ref_type = match r.ref_type.as_str() {
                CHILD_OF => SpanRefType::ChildOf,
                FOLLOWS_FROM => SpanRefType::FollowsFrom,
                _ => return Err(DecodeError::InvalidReference(r.ref_type)),
            };
            Ok(SpanRef {
                ref_type,
                trace_id: r.trace_id.parse()?,
                span_id: r.span_id.parse()?,
            })
        })
        .collect()
}

fn decode_logs(logs: Vec<LogDocument>) -> Result<Vec<Log>, DecodeError> {
    logs.into_iter()
        .map(|log| {
            Ok(Log {
                timestamp: from_millis(log.timestamp)?,
                fields: decode_key_values(log.fields)?,
            })
        })
        .collect()
}

fn decode_key_values(tags: Vec<KeyValueDocument>) -> Result<Vec<KeyValue>, DecodeError> {
    tags.into_iter().map(decode_key_value).collect()
}

fn decode_key_value(tag: KeyValueDocument) -> Result<KeyValue, DecodeError> {
    let raw = match tag.value {
        Some(Bson::String(s)) => s,
        None | Some(Bson::Null) => return Err(DecodeError::invalid_tag(tag.key, "missing value")),
        Some(other) => {
            return Err(DecodeError::invalid_tag(
                tag.key,
                format!("non-string value of type {:?}", other.element_type()),
            ))
        }
    };

    let value = match tag.value_type.as_str() {
        "string" => TagValue::String(raw),
        "bool" => TagValue::Bool(
            parse_bool(&raw).ok_or_else(|| DecodeError::invalid_tag(&tag.key, format!("{:?} is not a bool", raw)))?,
        ),
        "int64" => TagValue::Int64(
            raw.parse()
                .map_err(|e| DecodeError::invalid_tag(&tag.key, format!("{:?}: {}", raw, e)))?,
        ),
        "float64" => TagValue::Float64(
            raw.parse()
                .map_err(|e| DecodeError::invalid_tag(&tag.key, format!("{:?}: {}", raw, e)))?,
        ),
        other => {
            return Err(DecodeError::invalid_tag(
                tag.key,
                format!("not a valid value type {:?}", other),
            ))
        }
    };

    Ok(KeyValue { key: tag.key, value })
}

/// Accepts the same spellings other tracing backends write for booleans.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use proptest::prelude::*;

    fn sample_span() -> Span {
        let start = Utc.with_ymd_and_hms(2021, 7, 1, 1, 1, 1).unwrap();
        Span {
            trace_id: TraceId::new(3, 4),
            span_id: SpanId(5),
            operation_name: "HTTP GET /customer".to_string(),
            references: vec![
                SpanRef::child_of(TraceId::new(3, 4), SpanId(1)),
                SpanRef::follows_from(TraceId::new(3, 4), SpanId(2)),
            ],
            start_time: start,
            duration: Duration::from_micros(1_234),
            tags: vec![
                KeyValue::int64("http.status_code", 200),
                KeyValue::string("component", "net/http"),
                KeyValue::bool("error", false),
                KeyValue::float64("sampler.param", 0.25),
            ],
            logs: vec![Log {
                timestamp: start + chrono::Duration::milliseconds(3),
                fields: vec![KeyValue::string("event", "cache miss")],
            }],
            process_id: "p1".to_string(),
            process: Process {
                service_name: "customer".to_string(),
                tags: vec![KeyValue::string("hostname", "host-1")],
            },
            warnings: vec!["clock skew adjusted".to_string()],
        }
    }

    fn encoded(span: &Span) -> Document {
        encode_span_document(span).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let span = sample_span();
        assert_eq!(decode_span(encoded(&span)).unwrap(), span);
    }

    #[test]
    fn test_layout() {
        let doc = encoded(&sample_span());
        assert_eq!(doc.get_str(fields::TRACE_ID).unwrap(), "00000000000000030000000000000004");
        assert_eq!(doc.get_str(fields::SPAN_ID).unwrap(), "0000000000000005");
        assert_eq!(doc.get_i64(fields::DURATION).unwrap(), 1_234);
        assert!(doc.get_datetime(fields::START_TIME).is_ok());

        let tags = doc.get_array(fields::TAGS).unwrap();
        let status = tags[0].as_document().unwrap();
        assert_eq!(status.get_str("type").unwrap(), "int64");
        assert_eq!(status.get_str("value").unwrap(), "200");

        let refs = doc.get_array("references").unwrap();
        assert_eq!(refs[0].as_document().unwrap().get_str("refType").unwrap(), "CHILD_OF");
        assert_eq!(refs[1].as_document().unwrap().get_str("refType").unwrap(), "FOLLOWS_FROM");

        let log = doc.get_array("logs").unwrap()[0].as_document().unwrap().clone();
        assert_eq!(log.get_i64("timestamp").unwrap(), 1_625_101_261_003);
        assert_eq!(doc.get_document("process").unwrap().get_str("serviceName").unwrap(), "customer");
    }

    #[test]
    fn test_binary_tags_are_dropped() {
        let mut span = sample_span();
        span.tags.push(KeyValue::binary("payload", vec![1, 2, 3]));
        span.process.tags.push(KeyValue::binary("cert", vec![9]));

        let decoded = decode_span(encoded(&span)).unwrap();
        assert_eq!(decoded, sample_span());
    }

    #[test]
    fn test_invalid_reference_type() {
        let mut doc = encoded(&sample_span());
        doc.insert(
            "references",
            vec![Bson::Document(doc! { "refType": "PARENT_OF", "traceID": "1", "spanID": "2" })],
        );
        assert_eq!(
            decode_span(doc).unwrap_err(),
            DecodeError::InvalidReference("PARENT_OF".to_string())
        );
    }

    #[test]
    fn test_invalid_tag_values() {
        let cases = [
            doc! { "key": "k", "type": "int64", "value": "two hundred" },
            doc! { "key": "k", "type": "bool", "value": "yes" },
            doc! { "key": "k", "type": "float64", "value": "1.0.0" },
            doc! { "key": "k", "type": "binary", "value": "00" },
            doc! { "key": "k", "type": "string", "value": Bson::Null },
            doc! { "key": "k", "type": "string" },
            doc! { "key": "k", "type": "int64", "value": 200_i64 },
        ];
        for tag in cases {
            let mut doc = encoded(&sample_span());
            doc.insert(fields::TAGS, vec![Bson::Document(tag.clone())]);
            let err = decode_span(doc).unwrap_err();
            assert!(matches!(err, DecodeError::InvalidTagValue { .. }), "{tag}: {err}");
        }
    }

    #[test]
    fn test_log_fields_use_tag_decoder() {
        let mut doc = encoded(&sample_span());
        doc.insert(
            "logs",
            vec![Bson::Document(doc! {
                "timestamp": 0_i64,
                "fields": [{ "key": "k", "type": "float64", "value": "NaN-ish" }],
            })],
        );
        assert!(matches!(decode_span(doc), Err(DecodeError::InvalidTagValue { .. })));
    }

    #[test]
    fn test_malformed_identifiers() {
        let multibyte = format!("a\u{e9}{}", "a".repeat(15));
        for (field, value) in [
            (fields::TRACE_ID, ""),
            (fields::TRACE_ID, multibyte.as_str()),
            (fields::SPAN_ID, "not-hex"),
        ] {
            let mut doc = encoded(&sample_span());
            doc.insert(field, value);
            assert!(matches!(
                decode_span(doc),
                Err(DecodeError::MalformedIdentifier { .. })
            ));
        }
    }

    #[test]
    fn test_null_arrays_decode_empty() {
        let mut doc = encoded(&sample_span());
        for field in ["references", "tags", "logs", "warnings"] {
            doc.insert(field, Bson::Null);
        }
        doc.insert("_id", bson::oid::ObjectId::new());

        let span = decode_span(doc).unwrap();
        assert!(span.references.is_empty());
        assert!(span.tags.is_empty());
        assert!(span.logs.is_empty());
        assert!(span.warnings.is_empty());
    }

    #[test]
    fn test_missing_required_field() {
        let mut doc = encoded(&sample_span());
        doc.remove(fields::START_TIME);
        assert!(matches!(decode_span(doc), Err(DecodeError::MalformedDocument(_))));
    }

    #[test]
    fn test_negative_duration() {
        let mut doc = encoded(&sample_span());
        doc.insert(fields::DURATION, -1_i64);
        assert!(matches!(decode_span(doc), Err(DecodeError::MalformedDocument(_))));
    }

    #[test]
    fn test_bool_spellings() {
        assert_eq!(parse_bool("T"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }

    fn arb_tag() -> impl Strategy<Value = KeyValue> {
        let value = prop_oneof![
            ".*".prop_map(TagValue::String),
            any::<bool>().prop_map(TagValue::Bool),
            any::<i64>().prop_map(TagValue::Int64),
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(TagValue::Float64),
        ];
        ("[a-z.]{1,12}", value).prop_map(|(key, value)| KeyValue { key, value })
    }

    fn arb_key_values() -> impl Strategy<Value = Vec<KeyValue>> {
        let binary = ("[a-z]{1,8}", proptest::collection::vec(any::<u8>(), 0..8))
            .prop_map(|(key, bytes)| KeyValue::binary(key, bytes));
        proptest::collection::vec(prop_oneof![3 => arb_tag(), 1 => binary], 0..6)
    }

    fn arb_reference() -> impl Strategy<Value = SpanRef> {
        (any::<bool>(), any::<u64>(), any::<u64>(), any::<u64>()).prop_map(|(child, high, low, span)| {
            if child {
                SpanRef::child_of(TraceId::new(high, low), SpanId(span))
            } else {
                SpanRef::follows_from(TraceId::new(high, low), SpanId(span))
            }
        })
    }

    fn arb_log() -> impl Strategy<Value = Log> {
        (0_i64..4_000_000_000_000, arb_key_values()).prop_map(|(millis, fields)| Log {
            timestamp: Utc.timestamp_millis_opt(millis).unwrap(),
            fields,
        })
    }

    fn arb_span() -> impl Strategy<Value = Span> {
        let ids = (any::<u64>(), any::<u64>(), any::<u64>());
        let timing = (0_i64..4_000_000_000_000, 0_u64..86_400_000_000);
        let names = (".*", ".*", ".*");
        let body = (
            proptest::collection::vec(arb_reference(), 0..4),
            arb_key_values(),
            proptest::collection::vec(arb_log(), 0..3),
            arb_key_values(),
            proptest::collection::vec(".*", 0..3),
        );
        (ids, timing, names, body).prop_map(
            |((high, low, span_id), (millis, micros), (operation, process_id, service), body)| {
                let (references, tags, logs, process_tags, warnings) = body;
                Span {
                    trace_id: TraceId::new(high, low),
                    span_id: SpanId(span_id),
                    operation_name: operation,
                    references,
                    start_time: Utc.timestamp_millis_opt(millis).unwrap(),
                    duration: Duration::from_micros(micros),
                    tags,
                    logs,
                    process_id,
                    process: Process {
                        service_name: service,
                        tags: process_tags,
                    },
                    warnings,
                }
            },
        )
    }

    fn without_binary(key_values: &[KeyValue]) -> Vec<KeyValue> {
        key_values
            .iter()
            .filter(|kv| !matches!(kv.value, TagValue::Binary(_)))
            .cloned()
            .collect()
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_span(span in arb_span()) {
            let mut expected = span.clone();
            expected.tags = without_binary(&span.tags);
            expected.process.tags = without_binary(&span.process.tags);
            for log in &mut expected.logs {
                log.fields = without_binary(&log.fields);
            }
            prop_assert_eq!(decode_span(encoded(&span)).unwrap(), expected);
        }
    }
}
