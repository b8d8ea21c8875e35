//! Response shaping for the query surface
//!
//! A fetched span list is rendered per `formatting.format` (the span
//! object shape) and `formatting.focus` (the grouping granularity):
//! flat nodes, per-trace trees, or roots grouping several trees.

use serde_json::{Map as JsonMap, Value as JsonValue, json};
use uuid::Uuid;

use crate::data::types::{Span, TraceType, parse_trace_id};
use crate::domain::attributes::marshall;
use crate::domain::tree::{SpanArena, TreeError, nest_spans};
use crate::query::windowing::ResponseFormat;

// ============================================================================
// NODE SHAPES
// ============================================================================

pub fn render_node(span: &Span, format: ResponseFormat) -> JsonMap<String, JsonValue> {
    match format {
        ResponseFormat::Opentelemetry => otel_node(span),
        ResponseFormat::Agenta => agenta_node(span),
    }
}

/// Native record shape: the span serialized as stored, nested attributes
/// included, plus the derived duration.
pub fn agenta_node(span: &Span) -> JsonMap<String, JsonValue> {
    let mut map = match serde_json::to_value(span) {
        Ok(JsonValue::Object(map)) => map,
        _ => JsonMap::new(),
    };
    map.insert("duration_ms".to_string(), json!(span.duration_ms()));
    map
}

/// OTel-shaped span object: hex identifiers, unix-nano timestamps,
/// screaming enum constants, flat dot-keyed attributes.
pub fn otel_node(span: &Span) -> JsonMap<String, JsonValue> {
    let mut map = JsonMap::new();
    map.insert("traceId".to_string(), json!(span.trace_id.simple().to_string()));
    map.insert("spanId".to_string(), json!(span.span_id));
    if let Some(parent_id) = &span.parent_id {
        map.insert("parentSpanId".to_string(), json!(parent_id));
    }
    map.insert("name".to_string(), json!(span.span_name));
    map.insert(
        "kind".to_string(),
        json!(format!("SPAN_KIND_{}", span.span_kind.as_str().to_uppercase())),
    );
    map.insert(
        "startTimeUnixNano".to_string(),
        json!(unix_nanos(span.start_time).to_string()),
    );
    map.insert(
        "endTimeUnixNano".to_string(),
        json!(unix_nanos(span.end_time).to_string()),
    );

    let mut status = JsonMap::new();
    status.insert(
        "code".to_string(),
        json!(format!("STATUS_CODE_{}", span.status_code.as_str().to_uppercase())),
    );
    if let Some(message) = &span.status_message {
        status.insert("message".to_string(), json!(message));
    }
    map.insert("status".to_string(), JsonValue::Object(status));

    map.insert(
        "attributes".to_string(),
        JsonValue::Object(marshall(&span.attributes)),
    );
    map
}

fn unix_nanos(dt: chrono::DateTime<chrono::Utc>) -> i64 {
    dt.timestamp_nanos_opt()
        .unwrap_or_else(|| dt.timestamp_micros().saturating_mul(1_000))
}

// ============================================================================
// GROUPING
// ============================================================================

/// Partition spans by trace, preserving first-seen order.
pub fn group_by_trace(spans: Vec<Span>) -> Vec<(Uuid, Vec<Span>)> {
    let mut groups: Vec<(Uuid, Vec<Span>)> = Vec::new();
    for span in spans {
        match groups.iter_mut().find(|(id, _)| *id == span.trace_id) {
            Some((_, members)) => members.push(span),
            None => groups.push((span.trace_id, vec![span])),
        }
    }
    groups
}

/// One `{tree, nodes}` envelope for all spans of a trace. Trees are
/// rebuilt from stored parent pointers, so a child persisted before its
/// parent still attaches correctly.
pub fn tree_envelope(
    trace_id: Uuid,
    spans: &[Span],
    format: ResponseFormat,
) -> Result<JsonValue, TreeError> {
    let arena = SpanArena::by_parent(spans)?;
    let trace_type = arena
        .roots()
        .first()
        .map(|&idx| spans[idx].trace_type)
        .unwrap_or(TraceType::Unknown);
    let nodes = nest_spans(spans, &arena, &|span| render_node(span, format));

    Ok(json!({
        "tree": {"id": trace_id.to_string(), "type": trace_type.as_str()},
        "nodes": nodes,
    }))
}

/// The identifier a trace groups under at root focus. Annotation traces
/// annotate another trace and group under it via their root span's first
/// link; every other trace is its own root.
pub fn root_grouping_id(trace_id: Uuid, spans: &[Span]) -> Uuid {
    let root = spans.iter().find(|s| s.is_root());
    if let Some(root) = root
        && root.trace_type == TraceType::Annotation
        && let Some(link) = root.links.first()
        && let Some(linked) = parse_trace_id(&link.trace_id)
    {
        return linked;
    }
    trace_id
}

/// Group tree envelopes into `{root, trees}` envelopes, preserving order.
pub fn root_envelopes(trees: Vec<(Uuid, JsonValue)>) -> Vec<JsonValue> {
    let mut roots: Vec<(Uuid, Vec<JsonValue>)> = Vec::new();
    for (root_id, tree) in trees {
        match roots.iter_mut().find(|(id, _)| *id == root_id) {
            Some((_, members)) => members.push(tree),
            None => roots.push((root_id, vec![tree])),
        }
    }
    roots
        .into_iter()
        .map(|(root_id, trees)| json!({"root": {"id": root_id.to_string()}, "trees": trees}))
        .collect()
}
