//! OTLP export request conversion
//!
//! Turns a decoded `ExportTraceServiceRequest` into the two downstream
//! representations: the native span record and the legacy flat node shape
//! consumed by the observability queue. Conversion is atomic at batch
//! level: one bad span fails the whole request.

use chrono::{DateTime, TimeZone, Utc};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

use crate::data::types::{
    ATTRIBUTES_NAMESPACE, Span, SpanEvent, SpanKind, SpanLink, SpanReference, SpanStatusCode,
    SpanType, TenantContext, TraceType,
};
use crate::domain::attributes::{get_path, unmarshall};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("invalid trace id ({0} bytes, expected 16)")]
    InvalidTraceId(usize),
    #[error("invalid span id ({0} bytes, expected 8)")]
    InvalidSpanId(usize),
}

/// Flat node shape kept for the legacy observability pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyNode {
    pub node_id: String,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    pub node_type: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: f64,
    pub status: String,
    pub data: JsonValue,
}

impl LegacyNode {
    pub fn from_span(span: &Span) -> Self {
        Self {
            node_id: span.span_id.clone(),
            trace_id: span.trace_id.to_string(),
            parent_id: span.parent_id.clone(),
            name: span.span_name.clone(),
            node_type: span.span_type.as_str().to_string(),
            timestamp: span.start_time,
            duration_ms: span.duration_ms(),
            status: span.status_code.as_str().to_string(),
            data: span.attributes.clone(),
        }
    }
}

/// Convert every span in the export request. The request's resource and
/// scope groupings are flattened; tenant attribution comes from the
/// request context, not the wire payload.
pub fn convert_request(
    request: &ExportTraceServiceRequest,
    tenant: &TenantContext,
) -> Result<Vec<Span>, ConvertError> {
    let now = Utc::now();
    let mut spans = Vec::new();
    for resource_spans in &request.resource_spans {
        for scope_spans in &resource_spans.scope_spans {
            for otlp_span in &scope_spans.spans {
                spans.push(convert_span(otlp_span, tenant, now)?);
            }
        }
    }
    Ok(spans)
}

fn convert_span(
    otlp: &OtlpSpan,
    tenant: &TenantContext,
    now: DateTime<Utc>,
) -> Result<Span, ConvertError> {
    let trace_id = Uuid::from_slice(&otlp.trace_id)
        .map_err(|_| ConvertError::InvalidTraceId(otlp.trace_id.len()))?;
    if otlp.span_id.len() != 8 {
        return Err(ConvertError::InvalidSpanId(otlp.span_id.len()));
    }
    let span_id = hex::encode(&otlp.span_id);
    let parent_id = if otlp.parent_span_id.is_empty() {
        None
    } else {
        Some(hex::encode(&otlp.parent_span_id))
    };

    let span_name = if otlp.name.is_empty() {
        random_span_name()
    } else {
        otlp.name.clone()
    };

    let (start_time, end_time) =
        resolve_times(otlp.start_time_unix_nano, otlp.end_time_unix_nano, now);

    let (status_code, status_message) = match &otlp.status {
        Some(status) => (
            SpanStatusCode::from_otlp(status.code),
            (!status.message.is_empty()).then(|| status.message.clone()),
        ),
        None => (SpanStatusCode::Unset, None),
    };

    let attributes = namespace_attributes(&otlp.attributes);
    let trace_type = get_path(&attributes, &[ATTRIBUTES_NAMESPACE, "type", "trace"])
        .and_then(|v| v.as_str())
        .and_then(TraceType::parse)
        .unwrap_or_default();
    let span_type = get_path(&attributes, &[ATTRIBUTES_NAMESPACE, "type", "span"])
        .and_then(|v| v.as_str())
        .and_then(SpanType::parse)
        .unwrap_or_default();
    let references = extract_references(&attributes);

    let events = otlp
        .events
        .iter()
        .map(|event| SpanEvent {
            name: event.name.clone(),
            timestamp: nanos_to_datetime(event.time_unix_nano).unwrap_or(now),
            attributes: any_values_to_json(&event.attributes),
        })
        .collect();

    let links = otlp
        .links
        .iter()
        .map(|link| {
            let link_trace = Uuid::from_slice(&link.trace_id)
                .map_err(|_| ConvertError::InvalidTraceId(link.trace_id.len()))?;
            Ok(SpanLink {
                trace_id: link_trace.to_string(),
                span_id: hex::encode(&link.span_id),
                attributes: any_values_to_json(&link.attributes),
            })
        })
        .collect::<Result<Vec<_>, ConvertError>>()?;

    Ok(Span {
        trace_id,
        span_id,
        parent_id,
        span_name,
        span_kind: SpanKind::from_otlp(otlp.kind),
        trace_type,
        span_type,
        start_time,
        end_time,
        status_code,
        status_message,
        attributes,
        events,
        links,
        references,
        hashes: Vec::new(),
        created_at: now,
        updated_at: None,
        deleted_at: None,
        created_by_id: tenant.user_id,
        updated_by_id: None,
        deleted_by_id: None,
    })
}

/// A missing timestamp defaults to the other one; both missing default to
/// the ingestion time. `end < start` is tolerated, not corrected.
fn resolve_times(
    start_nanos: u64,
    end_nanos: u64,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = nanos_to_datetime(start_nanos);
    let end = nanos_to_datetime(end_nanos);
    match (start, end) {
        (Some(start), Some(end)) => (start, end),
        (Some(start), None) => (start, start),
        (None, Some(end)) => (end, end),
        (None, None) => (now, now),
    }
}

fn nanos_to_datetime(nanos: u64) -> Option<DateTime<Utc>> {
    if nanos == 0 {
        return None;
    }
    i64::try_from(nanos).ok().map(|n| Utc.timestamp_nanos(n))
}

pub fn random_span_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

// ============================================================================
// ATTRIBUTE NAMESPACING
// ============================================================================

/// Rebuild the nested attribute tree from the wire's flat dotted keys.
/// Keys already namespaced (`ag.*`) unflatten in place; everything else
/// is preserved under `ag.unsupported`.
fn namespace_attributes(
    attrs: &[opentelemetry_proto::tonic::common::v1::KeyValue],
) -> JsonValue {
    let mut flat = JsonMap::new();
    let namespaced_prefix = format!("{ATTRIBUTES_NAMESPACE}.");
    for kv in attrs {
        let Some(value) = kv.value.as_ref() else {
            continue;
        };
        let key = if kv.key.starts_with(&namespaced_prefix) {
            kv.key.clone()
        } else {
            format!("{ATTRIBUTES_NAMESPACE}.unsupported.{}", kv.key)
        };
        flat.insert(key, any_value_to_json(value));
    }
    unmarshall(&flat)
}

fn any_values_to_json(
    attrs: &[opentelemetry_proto::tonic::common::v1::KeyValue],
) -> JsonValue {
    let map: JsonMap<String, JsonValue> = attrs
        .iter()
        .filter_map(|kv| kv.value.as_ref().map(|v| (kv.key.clone(), any_value_to_json(v))))
        .collect();
    JsonValue::Object(map)
}

/// Convert an OTLP `AnyValue` to JSON, preserving native types.
fn any_value_to_json(value: &opentelemetry_proto::tonic::common::v1::AnyValue) -> JsonValue {
    use opentelemetry_proto::tonic::common::v1::any_value::Value;
    match &value.value {
        Some(Value::StringValue(s)) => serde_json::json!(s),
        Some(Value::BoolValue(b)) => serde_json::json!(b),
        Some(Value::IntValue(i)) => serde_json::json!(i),
        Some(Value::DoubleValue(d)) => serde_json::json!(d),
        Some(Value::ArrayValue(arr)) => {
            serde_json::json!(arr.values.iter().map(any_value_to_json).collect::<Vec<_>>())
        }
        Some(Value::KvlistValue(kvlist)) => {
            let map: JsonMap<String, JsonValue> = kvlist
                .values
                .iter()
                .filter_map(|kv| {
                    kv.value
                        .as_ref()
                        .map(|v| (kv.key.clone(), any_value_to_json(v)))
                })
                .collect();
            JsonValue::Object(map)
        }
        Some(Value::BytesValue(b)) => serde_json::json!(hex::encode(b)),
        None => JsonValue::Null,
    }
}

fn extract_references(attributes: &JsonValue) -> Vec<SpanReference> {
    get_path(attributes, &[ATTRIBUTES_NAMESPACE, "references"])
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Status};

    use super::*;

    fn tenant() -> TenantContext {
        TenantContext {
            organization_id: Uuid::from_u128(1),
            project_id: Uuid::from_u128(2),
            user_id: Some(Uuid::from_u128(3)),
        }
    }

    fn string_attr(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(value.to_string())),
            }),
        }
    }

    fn otlp_span() -> OtlpSpan {
        OtlpSpan {
            trace_id: vec![0u8; 15].into_iter().chain([7u8]).collect(),
            span_id: vec![0, 0, 0, 0, 0xde, 0xad, 0xbe, 0xef],
            trace_state: String::new(),
            parent_span_id: vec![],
            flags: 0,
            name: "ingest".to_string(),
            kind: 1,
            start_time_unix_nano: 1_700_000_000_000_000_000,
            end_time_unix_nano: 1_700_000_000_250_000_000,
            attributes: vec![
                string_attr("ag.type.span", "chat"),
                string_attr("llm.vendor", "openai"),
            ],
            dropped_attributes_count: 0,
            events: vec![],
            dropped_events_count: 0,
            links: vec![],
            dropped_links_count: 0,
            status: Some(Status {
                message: "boom".to_string(),
                code: 2,
            }),
        }
    }

    fn request(spans: Vec<OtlpSpan>) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: None,
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans,
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }

    #[test]
    fn converts_identifiers_and_classification() {
        let spans = convert_request(&request(vec![otlp_span()]), &tenant()).unwrap();
        assert_eq!(spans.len(), 1);

        let span = &spans[0];
        assert_eq!(span.trace_id, Uuid::from_u128(7));
        assert_eq!(span.span_id, "00000000deadbeef");
        assert!(span.parent_id.is_none());
        assert_eq!(span.span_type, SpanType::Chat);
        assert_eq!(span.span_kind, SpanKind::Internal);
        assert_eq!(span.status_code, SpanStatusCode::Error);
        assert_eq!(span.status_message.as_deref(), Some("boom"));
        assert_eq!(span.created_by_id, Some(Uuid::from_u128(3)));
    }

    #[test]
    fn namespaced_and_foreign_attributes() {
        let spans = convert_request(&request(vec![otlp_span()]), &tenant()).unwrap();
        let attrs = &spans[0].attributes;

        assert_eq!(
            get_path(attrs, &["ag", "type", "span"]),
            Some(&serde_json::json!("chat"))
        );
        assert_eq!(
            get_path(attrs, &["ag", "unsupported", "llm", "vendor"]),
            Some(&serde_json::json!("openai"))
        );
    }

    #[test]
    fn empty_name_gets_random_replacement() {
        let mut raw = otlp_span();
        raw.name = String::new();
        let spans = convert_request(&request(vec![raw]), &tenant()).unwrap();
        assert_eq!(spans[0].span_name.len(), 8);
        assert!(spans[0].span_name.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn missing_timestamps_default_to_each_other() {
        let mut raw = otlp_span();
        raw.end_time_unix_nano = 0;
        let spans = convert_request(&request(vec![raw]), &tenant()).unwrap();
        assert_eq!(spans[0].start_time, spans[0].end_time);

        let mut raw = otlp_span();
        raw.start_time_unix_nano = 0;
        raw.end_time_unix_nano = 0;
        let before = Utc::now();
        let spans = convert_request(&request(vec![raw]), &tenant()).unwrap();
        assert!(spans[0].start_time >= before);
    }

    #[test]
    fn one_bad_span_fails_the_whole_batch() {
        let mut bad = otlp_span();
        bad.span_id = vec![1, 2, 3];
        let err = convert_request(&request(vec![otlp_span(), bad]), &tenant()).unwrap_err();
        assert_eq!(err, ConvertError::InvalidSpanId(3));
    }

    #[test]
    fn legacy_node_mirrors_span() {
        let spans = convert_request(&request(vec![otlp_span()]), &tenant()).unwrap();
        let node = LegacyNode::from_span(&spans[0]);
        assert_eq!(node.node_id, spans[0].span_id);
        assert_eq!(node.node_type, "chat");
        assert_eq!(node.status, "error");
        assert!((node.duration_ms - 250.0).abs() < 1e-9);
    }
}
