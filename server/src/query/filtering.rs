//! Filter expression validation and normalization
//!
//! A filter is a recursive boolean expression of logical operators over
//! field conditions. Normalization validates operator/field pairs against
//! a fixed field schema and coerces values into canonical forms (UUID
//! strings, enum members, datetimes). No evaluation happens here; that is
//! deferred to the storage layer, which receives only normalized filters.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::data::types::{
    SpanKind, SpanStatusCode, SpanType, TraceType, parse_span_id, parse_trace_id,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilteringError {
    #[error("unknown filter field: {field}")]
    UnknownField { field: String },
    #[error("operator '{operator}' is not allowed on field '{field}'")]
    OperatorNotAllowed { field: String, operator: String },
    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("field '{field}' requires a key")]
    MissingKey { field: String },
}

impl FilteringError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// EXPRESSION TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
    Not,
    Nand,
    Nor,
}

/// Recursive filter expression. Deserialized untagged: an element of
/// `conditions` is either a nested `Filtering` or a leaf `Condition`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Filtering {
    #[serde(default)]
    pub operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<FilterNode>,
}

/// `Leaf` must come first: `Filtering` has only defaulted fields and
/// would otherwise swallow every condition object during untagged
/// deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Leaf(Condition),
    Nested(Filtering),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
    #[serde(default)]
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ConditionOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConditionOptions {
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    // comparison
    #[default]
    Is,
    IsNot,
    // numeric
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    Btwn,
    // string
    Startswith,
    Endswith,
    Contains,
    Matches,
    Like,
    // list
    In,
    NotIn,
    // existence
    Exists,
    NotExists,
    // dict
    Has,
    HasNot,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Is => "is",
            Self::IsNot => "is_not",
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Gte => "gte",
            Self::Lte => "lte",
            Self::Btwn => "btwn",
            Self::Startswith => "startswith",
            Self::Endswith => "endswith",
            Self::Contains => "contains",
            Self::Matches => "matches",
            Self::Like => "like",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
            Self::Has => "has",
            Self::HasNot => "has_not",
        }
    }

    pub fn family(&self) -> OperatorFamily {
        match self {
            Self::Is | Self::IsNot => OperatorFamily::Comparison,
            Self::Eq | Self::Neq | Self::Gt | Self::Lt | Self::Gte | Self::Lte | Self::Btwn => {
                OperatorFamily::Numeric
            }
            Self::Startswith | Self::Endswith | Self::Contains | Self::Matches | Self::Like => {
                OperatorFamily::String
            }
            Self::In | Self::NotIn => OperatorFamily::List,
            Self::Exists | Self::NotExists => OperatorFamily::Existence,
            Self::Has | Self::HasNot => OperatorFamily::Dict,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorFamily {
    Comparison,
    Numeric,
    String,
    List,
    Existence,
    Dict,
}

// ============================================================================
// FIELD SCHEMA
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldClass {
    TraceId,
    SpanId,
    /// Null value is legal (means "is a root span")
    ParentId,
    Enum(EnumKind),
    Text,
    Timestamp,
    UserId,
    Attributes,
    /// links / references / events
    Collection,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumKind {
    TraceType,
    SpanType,
    SpanKind,
    StatusCode,
}

/// Unknown fields are rejected rather than passed through.
fn classify(field: &str) -> Result<FieldClass, FilteringError> {
    let class = match field {
        "trace_id" => FieldClass::TraceId,
        "span_id" => FieldClass::SpanId,
        "parent_id" => FieldClass::ParentId,
        "trace_type" => FieldClass::Enum(EnumKind::TraceType),
        "span_type" => FieldClass::Enum(EnumKind::SpanType),
        "span_kind" => FieldClass::Enum(EnumKind::SpanKind),
        "status_code" => FieldClass::Enum(EnumKind::StatusCode),
        "span_name" | "status_message" => FieldClass::Text,
        "start_time" | "end_time" | "created_at" | "updated_at" | "deleted_at" => {
            FieldClass::Timestamp
        }
        "created_by_id" | "updated_by_id" | "deleted_by_id" => FieldClass::UserId,
        "attributes" => FieldClass::Attributes,
        "links" | "references" | "events" => FieldClass::Collection,
        "content" => FieldClass::Content,
        _ => {
            return Err(FilteringError::UnknownField {
                field: field.to_string(),
            });
        }
    };
    Ok(class)
}

impl FieldClass {
    fn allows(&self, family: OperatorFamily) -> bool {
        use OperatorFamily::*;
        match self {
            Self::TraceId | Self::SpanId | Self::ParentId | Self::Enum(_) => {
                matches!(family, Comparison | List)
            }
            Self::Text => matches!(family, Comparison | String | List | Existence),
            Self::Timestamp => matches!(family, Comparison | Numeric | String | List),
            Self::UserId => matches!(family, Comparison | List | Existence),
            Self::Attributes => true,
            Self::Collection => matches!(family, List | Dict | Existence),
            Self::Content => matches!(family, String),
        }
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

impl Filtering {
    /// Validate and coerce the whole expression, recursively. Returns the
    /// normalized copy; the first violation aborts with a typed error.
    pub fn normalize(&self) -> Result<Filtering, FilteringError> {
        let conditions = self
            .conditions
            .iter()
            .map(|node| match node {
                FilterNode::Nested(inner) => inner.normalize().map(FilterNode::Nested),
                FilterNode::Leaf(condition) => condition.normalize().map(FilterNode::Leaf),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Filtering {
            operator: self.operator,
            conditions,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl Condition {
    pub fn normalize(&self) -> Result<Condition, FilteringError> {
        let class = classify(&self.field)?;
        let family = self.operator.family();

        if !class.allows(family) {
            return Err(FilteringError::OperatorNotAllowed {
                field: self.field.clone(),
                operator: self.operator.as_str().to_string(),
            });
        }
        // Content is string-family but narrower than the whole family
        if class == FieldClass::Content && self.operator != ConditionOperator::Contains {
            return Err(FilteringError::OperatorNotAllowed {
                field: self.field.clone(),
                operator: self.operator.as_str().to_string(),
            });
        }

        if family == OperatorFamily::Existence {
            if self.value.is_some() {
                return Err(FilteringError::invalid(
                    &self.field,
                    "existence operators take no value",
                ));
            }
            if class == FieldClass::Attributes && self.key.is_none() {
                return Err(FilteringError::MissingKey {
                    field: self.field.clone(),
                });
            }
            return Ok(self.clone());
        }

        let mut normalized = self.clone();
        normalized.value = Some(self.coerce_value(class, family)?);
        Ok(normalized)
    }

    fn coerce_value(
        &self,
        class: FieldClass,
        family: OperatorFamily,
    ) -> Result<JsonValue, FilteringError> {
        let field = self.field.as_str();
        let value = self.value.as_ref().ok_or_else(|| {
            FilteringError::invalid(field, format!("operator '{}' requires a value", self.operator.as_str()))
        })?;

        match class {
            FieldClass::TraceId => coerce_scalar_or_list(field, value, family, coerce_trace_id),
            FieldClass::SpanId => coerce_scalar_or_list(field, value, family, coerce_span_id),
            FieldClass::ParentId => {
                // Null parent means "is a root span", legal only as a scalar
                if value.is_null() && family == OperatorFamily::Comparison {
                    return Ok(JsonValue::Null);
                }
                coerce_scalar_or_list(field, value, family, coerce_span_id)
            }
            FieldClass::Enum(kind) => {
                coerce_scalar_or_list(field, value, family, move |field, v| {
                    coerce_enum(field, v, kind)
                })
            }
            FieldClass::Text => match family {
                OperatorFamily::List => coerce_list(field, value, coerce_text),
                _ => coerce_text(field, value),
            },
            FieldClass::Timestamp => match family {
                OperatorFamily::List => coerce_list(field, value, coerce_timestamp_value),
                OperatorFamily::Numeric if self.operator == ConditionOperator::Btwn => {
                    let items = value.as_array().ok_or_else(|| {
                        FilteringError::invalid(field, "'btwn' requires a [low, high] pair")
                    })?;
                    if items.len() != 2 {
                        return Err(FilteringError::invalid(
                            field,
                            "'btwn' requires exactly two bounds",
                        ));
                    }
                    coerce_list(field, value, coerce_timestamp_value)
                }
                // String operators match against the canonical rendering
                OperatorFamily::String => coerce_text(field, value),
                _ => coerce_timestamp_value(field, value),
            },
            FieldClass::UserId => coerce_scalar_or_list(field, value, family, coerce_user_id),
            FieldClass::Attributes => {
                if self.key.is_none() {
                    return Err(FilteringError::MissingKey {
                        field: self.field.clone(),
                    });
                }
                Ok(value.clone())
            }
            FieldClass::Collection => match family {
                OperatorFamily::List => {
                    let items = value.as_array().ok_or_else(|| {
                        FilteringError::invalid(field, "list operators require a list value")
                    })?;
                    if items.iter().any(|item| !item.is_object()) {
                        return Err(FilteringError::invalid(
                            field,
                            "list entries must be partial-match objects",
                        ));
                    }
                    Ok(value.clone())
                }
                OperatorFamily::Dict => {
                    let key = self.key.as_deref().ok_or(FilteringError::MissingKey {
                        field: self.field.clone(),
                    })?;
                    if !key.starts_with("attributes.") {
                        return Err(FilteringError::invalid(
                            field,
                            "dict keys must be dot-paths rooted at 'attributes.'",
                        ));
                    }
                    Ok(value.clone())
                }
                _ => unreachable!("existence handled before coercion"),
            },
            FieldClass::Content => {
                let text = value.as_str().ok_or_else(|| {
                    FilteringError::invalid(field, "content value must be a string")
                })?;
                Ok(JsonValue::String(text.to_string()))
            }
        }
    }
}

// ============================================================================
// VALUE COERCION
// ============================================================================

fn coerce_scalar_or_list(
    field: &str,
    value: &JsonValue,
    family: OperatorFamily,
    coerce: impl Fn(&str, &JsonValue) -> Result<JsonValue, FilteringError>,
) -> Result<JsonValue, FilteringError> {
    match family {
        OperatorFamily::List => coerce_list(field, value, coerce),
        _ => coerce(field, value),
    }
}

fn coerce_list(
    field: &str,
    value: &JsonValue,
    coerce: impl Fn(&str, &JsonValue) -> Result<JsonValue, FilteringError>,
) -> Result<JsonValue, FilteringError> {
    let items = value
        .as_array()
        .ok_or_else(|| FilteringError::invalid(field, "list operators require a list value"))?;
    let coerced = items
        .iter()
        .map(|item| coerce(field, item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(JsonValue::Array(coerced))
}

fn coerce_trace_id(field: &str, value: &JsonValue) -> Result<JsonValue, FilteringError> {
    let raw = scalar_to_string(value)
        .ok_or_else(|| FilteringError::invalid(field, "expected a string or integer identifier"))?;
    let uuid = parse_trace_id(&raw)
        .ok_or_else(|| FilteringError::invalid(field, format!("unparseable identifier '{raw}'")))?;
    Ok(JsonValue::String(uuid.to_string()))
}

fn coerce_span_id(field: &str, value: &JsonValue) -> Result<JsonValue, FilteringError> {
    let raw = scalar_to_string(value)
        .ok_or_else(|| FilteringError::invalid(field, "expected a string or integer identifier"))?;
    let span_id = parse_span_id(&raw)
        .ok_or_else(|| FilteringError::invalid(field, format!("unparseable identifier '{raw}'")))?;
    Ok(JsonValue::String(span_id))
}

fn coerce_enum(field: &str, value: &JsonValue, kind: EnumKind) -> Result<JsonValue, FilteringError> {
    let raw = value
        .as_str()
        .ok_or_else(|| FilteringError::invalid(field, "expected an enum member string"))?;
    let canonical = match kind {
        EnumKind::TraceType => TraceType::parse(raw).map(|v| v.as_str()),
        EnumKind::SpanType => SpanType::parse(raw).map(|v| v.as_str()),
        EnumKind::SpanKind => SpanKind::parse(raw).map(|v| v.as_str()),
        EnumKind::StatusCode => SpanStatusCode::parse(raw).map(|v| v.as_str()),
    };
    let canonical = canonical
        .ok_or_else(|| FilteringError::invalid(field, format!("unknown enum member '{raw}'")))?;
    Ok(JsonValue::String(canonical.to_string()))
}

fn coerce_text(field: &str, value: &JsonValue) -> Result<JsonValue, FilteringError> {
    scalar_to_string(value)
        .map(JsonValue::String)
        .ok_or_else(|| FilteringError::invalid(field, "expected a string-castable scalar"))
}

/// Render a scalar as a string: identifiers arrive as strings or bare
/// integers, text comparisons accept any stringifiable scalar.
fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_user_id(field: &str, value: &JsonValue) -> Result<JsonValue, FilteringError> {
    let raw = value
        .as_str()
        .ok_or_else(|| FilteringError::invalid(field, "expected a UUID string"))?;
    let uuid = uuid::Uuid::parse_str(raw)
        .map_err(|_| FilteringError::invalid(field, format!("invalid UUID '{raw}'")))?;
    Ok(JsonValue::String(uuid.to_string()))
}

/// Coerce an epoch integer or ISO 8601 string into the canonical RFC 3339
/// rendering used by the storage layer.
fn coerce_timestamp_value(field: &str, value: &JsonValue) -> Result<JsonValue, FilteringError> {
    let datetime = coerce_timestamp(field, value)?;
    Ok(JsonValue::String(
        datetime.to_rfc3339_opts(SecondsFormat::Micros, true),
    ))
}

pub fn coerce_timestamp(field: &str, value: &JsonValue) -> Result<DateTime<Utc>, FilteringError> {
    if let Some(n) = value.as_i64() {
        return epoch_to_datetime(n)
            .ok_or_else(|| FilteringError::invalid(field, format!("ambiguous epoch value {n}")));
    }
    let raw = value
        .as_str()
        .ok_or_else(|| FilteringError::invalid(field, "expected an epoch integer or ISO string"))?;

    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        let n = raw
            .parse::<i64>()
            .map_err(|_| FilteringError::invalid(field, format!("epoch out of range '{raw}'")))?;
        return epoch_to_datetime(n)
            .ok_or_else(|| FilteringError::invalid(field, format!("ambiguous epoch value {n}")));
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| FilteringError::invalid(field, format!("unparseable timestamp '{raw}'")))
}

/// Disambiguate an epoch integer by digit count: 10 digits are seconds,
/// 13 milliseconds, 16 microseconds, 19 nanoseconds.
fn epoch_to_datetime(n: i64) -> Option<DateTime<Utc>> {
    if n <= 0 {
        return None;
    }
    match n.to_string().len() {
        10 => Utc.timestamp_opt(n, 0).single(),
        13 => Utc.timestamp_millis_opt(n).single(),
        16 => Some(Utc.timestamp_micros(n).single()?),
        19 => Some(Utc.timestamp_nanos(n)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn condition(field: &str, operator: ConditionOperator, value: JsonValue) -> Condition {
        Condition {
            field: field.to_string(),
            key: None,
            value: Some(value),
            operator,
            options: None,
        }
    }

    #[test]
    fn trace_id_rejects_string_operators() {
        let err = condition("trace_id", ConditionOperator::Contains, json!("abc"))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, FilteringError::OperatorNotAllowed { .. }));
    }

    #[test]
    fn trace_id_list_canonicalizes_mixed_forms() {
        let normalized = condition(
            "trace_id",
            ConditionOperator::In,
            json!([
                "0x31d6cfe04b9011ec800142010a8000b0",
                "31d6cfe0-4b90-11ec-8001-42010a8000b0"
            ]),
        )
        .normalize()
        .unwrap();

        let items = normalized.value.unwrap();
        let items = items.as_array().unwrap();
        assert_eq!(items[0], items[1]);
        assert_eq!(items[0], json!("31d6cfe0-4b90-11ec-8001-42010a8000b0"));
    }

    #[test]
    fn identifier_and_text_fields_accept_numeric_scalars() {
        let ok = condition("trace_id", ConditionOperator::Is, json!(7))
            .normalize()
            .unwrap();
        assert_eq!(
            ok.value,
            Some(json!("00000000-0000-0000-0000-000000000007"))
        );

        let ok = condition("span_id", ConditionOperator::Is, json!(255))
            .normalize()
            .unwrap();
        assert_eq!(ok.value, Some(json!("00000000000000ff")));

        let ok = condition("span_name", ConditionOperator::Is, json!(42))
            .normalize()
            .unwrap();
        assert_eq!(ok.value, Some(json!("42")));

        // containers are not identifier scalars
        let err = condition("trace_id", ConditionOperator::Is, json!([7]))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, FilteringError::InvalidValue { .. }));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = condition("no_such_field", ConditionOperator::Is, json!("x"))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, FilteringError::UnknownField { .. }));
    }

    #[test]
    fn enum_field_rejects_unknown_member() {
        let err = condition("span_type", ConditionOperator::Is, json!("teleportation"))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, FilteringError::InvalidValue { .. }));

        let ok = condition("span_type", ConditionOperator::Is, json!("CHAT"))
            .normalize()
            .unwrap();
        assert_eq!(ok.value, Some(json!("chat")));
    }

    #[test]
    fn parent_id_null_means_root() {
        let normalized = condition("parent_id", ConditionOperator::Is, JsonValue::Null)
            .normalize()
            .unwrap();
        assert_eq!(normalized.value, Some(JsonValue::Null));

        // but not inside a list
        let err = condition("parent_id", ConditionOperator::In, json!([null]))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, FilteringError::InvalidValue { .. }));
    }

    #[test]
    fn epoch_digit_count_disambiguation() {
        let field = "start_time";
        let forms = [
            json!(1700000000i64),
            json!(1700000000000i64),
            json!(1700000000000000i64),
            json!(1700000000000000000i64),
            json!("1700000000"),
        ];
        let expected = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        for form in forms {
            assert_eq!(coerce_timestamp(field, &form).unwrap(), expected);
        }

        // 11 digits is neither seconds nor milliseconds
        assert!(coerce_timestamp(field, &json!(17000000000i64)).is_err());
    }

    #[test]
    fn timestamp_accepts_iso_strings() {
        let dt = coerce_timestamp("start_time", &json!("2024-05-01T12:00:00Z")).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn timestamp_btwn_requires_two_bounds() {
        let err = condition("start_time", ConditionOperator::Btwn, json!([1700000000i64]))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, FilteringError::InvalidValue { .. }));

        let ok = condition(
            "start_time",
            ConditionOperator::Btwn,
            json!([1700000000i64, 1700003600i64]),
        )
        .normalize()
        .unwrap();
        assert_eq!(ok.value.unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn existence_operators_take_no_value() {
        let err = condition("span_name", ConditionOperator::Exists, json!("x"))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, FilteringError::InvalidValue { .. }));

        let bare = Condition {
            field: "status_message".to_string(),
            key: None,
            value: None,
            operator: ConditionOperator::NotExists,
            options: None,
        };
        assert!(bare.normalize().is_ok());
    }

    #[test]
    fn attributes_require_a_key() {
        let err = condition("attributes", ConditionOperator::Is, json!("x"))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, FilteringError::MissingKey { .. }));

        let mut with_key = condition("attributes", ConditionOperator::Gt, json!(0.01));
        with_key.key = Some("ag.metrics.costs.cumulative.total".to_string());
        assert!(with_key.normalize().is_ok());
    }

    #[test]
    fn collection_dict_keys_must_root_at_attributes() {
        let mut has = condition("references", ConditionOperator::Has, json!("v1"));
        has.key = Some("slug".to_string());
        assert!(matches!(
            has.normalize().unwrap_err(),
            FilteringError::InvalidValue { .. }
        ));

        has.key = Some("attributes.environment".to_string());
        assert!(has.normalize().is_ok());
    }

    #[test]
    fn collection_list_entries_must_be_objects() {
        let err = condition("links", ConditionOperator::In, json!(["not-an-object"]))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, FilteringError::InvalidValue { .. }));

        let ok = condition(
            "links",
            ConditionOperator::In,
            json!([{"trace_id": "31d6cfe0-4b90-11ec-8001-42010a8000b0"}]),
        );
        assert!(ok.normalize().is_ok());
    }

    #[test]
    fn content_accepts_contains_only() {
        let err = condition("content", ConditionOperator::Startswith, json!("hello"))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, FilteringError::OperatorNotAllowed { .. }));

        assert!(
            condition("content", ConditionOperator::Contains, json!("hello"))
                .normalize()
                .is_ok()
        );
    }

    #[test]
    fn nested_expressions_normalize_recursively() {
        let filtering = Filtering {
            operator: LogicalOperator::Or,
            conditions: vec![
                FilterNode::Leaf(condition("span_type", ConditionOperator::Is, json!("chat"))),
                FilterNode::Nested(Filtering {
                    operator: LogicalOperator::And,
                    conditions: vec![FilterNode::Leaf(condition(
                        "trace_id",
                        ConditionOperator::Contains,
                        json!("zz"),
                    ))],
                }),
            ],
        };
        assert!(filtering.normalize().is_err());
    }

    #[test]
    fn filtering_deserializes_nested_json() {
        let raw = json!({
            "operator": "and",
            "conditions": [
                {"field": "span_type", "operator": "is", "value": "chat"},
                {"operator": "or", "conditions": [
                    {"field": "status_code", "operator": "is", "value": "error"},
                ]},
            ]
        });
        let filtering: Filtering = serde_json::from_value(raw).unwrap();
        assert_eq!(filtering.conditions.len(), 2);
        assert!(matches!(filtering.conditions[1], FilterNode::Nested(_)));
        assert!(filtering.normalize().is_ok());
    }
}
