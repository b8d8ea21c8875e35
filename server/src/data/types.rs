//! Span record types shared across ingestion, storage and query
//!
//! A trace has no persisted record of its own; it is the set of spans
//! sharing a `trace_id`, reconstructed into a tree at query time via
//! `parent_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// ============================================================================
// CLASSIFICATION ENUMS
// ============================================================================

/// OTLP span kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Internal => "internal",
            Self::Server => "server",
            Self::Client => "client",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }

    /// Map the OTLP protobuf enum integer
    pub fn from_otlp(kind: i32) -> Self {
        match kind {
            1 => Self::Internal,
            2 => Self::Server,
            3 => Self::Client,
            4 => Self::Producer,
            5 => Self::Consumer,
            _ => Self::Unspecified,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unspecified" | "span_kind_unspecified" => Some(Self::Unspecified),
            "internal" | "span_kind_internal" => Some(Self::Internal),
            "server" | "span_kind_server" => Some(Self::Server),
            "client" | "span_kind_client" => Some(Self::Client),
            "producer" | "span_kind_producer" => Some(Self::Producer),
            "consumer" | "span_kind_consumer" => Some(Self::Consumer),
            _ => None,
        }
    }
}

/// High-level purpose of a whole trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceType {
    Invocation,
    Annotation,
    #[default]
    Unknown,
}

impl TraceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invocation => "invocation",
            Self::Annotation => "annotation",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "invocation" => Some(Self::Invocation),
            "annotation" => Some(Self::Annotation),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Span-level classification for LLM workloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanType {
    Agent,
    Chain,
    Workflow,
    Task,
    Tool,
    Embedding,
    Query,
    Llm,
    Completion,
    Chat,
    Rerank,
    #[default]
    Unknown,
}

impl SpanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Chain => "chain",
            Self::Workflow => "workflow",
            Self::Task => "task",
            Self::Tool => "tool",
            Self::Embedding => "embedding",
            Self::Query => "query",
            Self::Llm => "llm",
            Self::Completion => "completion",
            Self::Chat => "chat",
            Self::Rerank => "rerank",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "agent" => Some(Self::Agent),
            "chain" => Some(Self::Chain),
            "workflow" => Some(Self::Workflow),
            "task" => Some(Self::Task),
            "tool" => Some(Self::Tool),
            "embedding" => Some(Self::Embedding),
            "query" => Some(Self::Query),
            "llm" => Some(Self::Llm),
            "completion" => Some(Self::Completion),
            "chat" => Some(Self::Chat),
            "rerank" => Some(Self::Rerank),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Span types that consume model tokens and therefore carry
    /// incremental costs.
    pub fn is_cost_bearing(&self) -> bool {
        matches!(
            self,
            Self::Embedding | Self::Query | Self::Completion | Self::Chat | Self::Rerank
        )
    }
}

/// OTLP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

impl SpanStatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }

    pub fn from_otlp(code: i32) -> Self {
        match code {
            1 => Self::Ok,
            2 => Self::Error,
            _ => Self::Unset,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unset" | "status_code_unset" => Some(Self::Unset),
            "ok" | "status_code_ok" => Some(Self::Ok),
            "error" | "status_code_error" => Some(Self::Error),
            _ => None,
        }
    }
}

// ============================================================================
// SPAN RECORD
// ============================================================================

/// Top-level key under which all span attributes are namespaced
pub const ATTRIBUTES_NAMESPACE: &str = "ag";

/// Timed event attached to a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub attributes: JsonValue,
}

/// Causal link to a span in another (or the same) trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub attributes: JsonValue,
}

/// Reference to an application entity (app, variant, environment, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub attributes: JsonValue,
}

/// Content-addressing hash attached at ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanHash {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub attributes: JsonValue,
}

/// One timed unit of work within a trace, immutable once persisted.
///
/// `(trace_id, span_id)` is unique. `parent_id = None` marks a root span.
/// Metrics propagation mutates `attributes` before persistence, never after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: Uuid,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    pub span_name: String,
    pub span_kind: SpanKind,
    pub trace_type: TraceType,
    pub span_type: SpanType,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    pub status_code: SpanStatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,

    /// Arbitrarily nested JSON, namespaced under [`ATTRIBUTES_NAMESPACE`]
    #[serde(default)]
    pub attributes: JsonValue,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SpanEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<SpanLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<SpanReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<SpanHash>,

    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by_id: Option<Uuid>,
}

impl Span {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Duration in milliseconds; negative when `end_time < start_time`,
    /// which ingestion tolerates and does not correct.
    pub fn duration_ms(&self) -> f64 {
        (self.end_time - self.start_time).num_microseconds().unwrap_or(0) as f64 / 1_000.0
    }
}

// ============================================================================
// TENANT CONTEXT
// ============================================================================

/// Tenant attribution carried with every queued span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub organization_id: Uuid,
    pub project_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

// ============================================================================
// ANALYTICS AGGREGATES
// ============================================================================

/// Component-wise aggregate over a set of root spans
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Analytics {
    pub count: u64,
    /// Summed duration in milliseconds
    pub duration: f64,
    pub costs: f64,
    pub tokens: f64,
}

impl Analytics {
    pub fn plus(&mut self, other: &Analytics) {
        self.count += other.count;
        self.duration += other.duration;
        self.costs += other.costs;
        self.tokens += other.tokens;
    }
}

/// One time-bucketed aggregation slot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub timestamp: DateTime<Utc>,
    /// Bucket width in seconds
    pub interval: i64,
    pub total: Analytics,
    pub errors: Analytics,
}

// ============================================================================
// IDENTIFIER CANONICALIZATION
// ============================================================================

/// Parse an externally supplied trace identifier into canonical UUID form.
///
/// Accepts decimal integers, `0x`-prefixed hex, bare hex (up to 32 digits,
/// left-padded), and UUID strings.
pub fn parse_trace_id(raw: &str) -> Option<Uuid> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(hex_part) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        return parse_hex_id(hex_part);
    }

    if raw.contains('-') {
        return Uuid::parse_str(raw).ok();
    }

    if raw.chars().all(|c| c.is_ascii_digit()) {
        // Could be decimal or all-digit hex; decimal is the documented form
        if let Ok(n) = raw.parse::<u128>() {
            return Some(Uuid::from_u128(n));
        }
    }

    parse_hex_id(raw)
}

/// Parse a span identifier (64-bit) into its canonical 16-digit lowercase
/// hex form. Accepts `0x`-prefixed hex, bare hex, and decimal integers.
pub fn parse_span_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(hex_part) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        return normalize_span_hex(hex_part);
    }

    if raw.chars().all(|c| c.is_ascii_digit())
        && let Ok(n) = raw.parse::<u64>()
    {
        return Some(format!("{:016x}", n));
    }

    normalize_span_hex(raw)
}

fn parse_hex_id(hex_part: &str) -> Option<Uuid> {
    if hex_part.is_empty() || hex_part.len() > 32 {
        return None;
    }
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let padded = format!("{:0>32}", hex_part.to_lowercase());
    Uuid::parse_str(&padded).ok()
}

fn normalize_span_hex(hex_part: &str) -> Option<String> {
    if hex_part.is_empty() || hex_part.len() > 16 {
        return None;
    }
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("{:0>16}", hex_part.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_accepts_all_documented_forms() {
        let canonical = Uuid::parse_str("31d6cfe0-4b90-11ec-8001-42010a8000b0").unwrap();

        assert_eq!(
            parse_trace_id("31d6cfe0-4b90-11ec-8001-42010a8000b0"),
            Some(canonical)
        );
        assert_eq!(
            parse_trace_id("0x31d6cfe04b9011ec800142010a8000b0"),
            Some(canonical)
        );
        assert_eq!(
            parse_trace_id("31d6cfe04b9011ec800142010a8000b0"),
            Some(canonical)
        );
        assert_eq!(
            parse_trace_id(&canonical.as_u128().to_string()),
            Some(canonical)
        );
    }

    #[test]
    fn trace_id_rejects_garbage() {
        assert_eq!(parse_trace_id(""), None);
        assert_eq!(parse_trace_id("not-a-trace-id"), None);
        assert_eq!(parse_trace_id("0x"), None);
        assert_eq!(parse_trace_id("0xzz"), None);
        // 33 hex digits is wider than 128 bits
        assert_eq!(parse_trace_id(&"a".repeat(33)), None);
    }

    #[test]
    fn span_id_normalizes_to_padded_hex() {
        assert_eq!(
            parse_span_id("0xdeadbeef"),
            Some("00000000deadbeef".to_string())
        );
        assert_eq!(parse_span_id("ABCDEF0123456789"), Some("abcdef0123456789".to_string()));
        assert_eq!(parse_span_id("255"), Some("00000000000000ff".to_string()));
        assert_eq!(parse_span_id(&"a".repeat(17)), None);
    }

    #[test]
    fn span_kind_from_otlp_enum() {
        assert_eq!(SpanKind::from_otlp(2), SpanKind::Server);
        assert_eq!(SpanKind::from_otlp(0), SpanKind::Unspecified);
        assert_eq!(SpanKind::from_otlp(99), SpanKind::Unspecified);
    }

    #[test]
    fn analytics_plus_accumulates_componentwise() {
        let mut total = Analytics {
            count: 2,
            duration: 100.0,
            costs: 0.01,
            tokens: 15.0,
        };
        total.plus(&Analytics {
            count: 1,
            duration: 50.0,
            costs: 0.02,
            tokens: 30.0,
        });

        assert_eq!(total.count, 3);
        assert_eq!(total.duration, 150.0);
        assert!((total.costs - 0.03).abs() < 1e-12);
        assert_eq!(total.tokens, 45.0);
    }

    #[test]
    fn cost_bearing_span_types() {
        assert!(SpanType::Chat.is_cost_bearing());
        assert!(SpanType::Embedding.is_cost_bearing());
        assert!(!SpanType::Agent.is_cost_bearing());
        assert!(!SpanType::Unknown.is_cost_bearing());
    }
}
