//! In-memory span store
//!
//! Backing store for tests and single-process deployments. Evaluation
//! assumes filters arrive normalized: identifiers in canonical UUID/hex
//! form, enums lowercased, timestamps rendered as fixed-width RFC 3339
//! (which makes lexicographic comparison chronological).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::core::constants::{
    DEFAULT_ANALYTICS_INTERVAL_SECS, DEFAULT_QUERY_LIMIT, DEFAULT_WINDOW_DAYS, MAX_QUERY_LIMIT,
};
use crate::data::store::{SpanStore, StoreError};
use crate::data::types::{Analytics, Bucket, Span};
use crate::domain::attributes::get_path;
use crate::domain::metrics::{cumulative_costs, cumulative_tokens};
use crate::query::filtering::{Condition, ConditionOperator, FilterNode, Filtering, LogicalOperator};
use crate::query::windowing::{Order, Windowing};

#[derive(Default)]
pub struct InMemorySpanStore {
    spans: RwLock<HashMap<Uuid, Vec<Span>>>,
}

impl InMemorySpanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpanStore for InMemorySpanStore {
    async fn insert(&self, project_id: Uuid, spans: Vec<Span>) -> Result<usize, StoreError> {
        let mut guard = self.spans.write();
        let stored = guard.entry(project_id).or_default();
        let count = spans.len();
        for span in spans {
            // (trace_id, span_id) is unique; redelivery overwrites
            match stored
                .iter_mut()
                .find(|s| s.trace_id == span.trace_id && s.span_id == span.span_id)
            {
                Some(existing) => *existing = span,
                None => stored.push(span),
            }
        }
        Ok(count)
    }

    async fn query(
        &self,
        project_id: Uuid,
        filtering: &Filtering,
        windowing: &Windowing,
    ) -> Result<(Vec<Span>, usize), StoreError> {
        let guard = self.spans.read();
        let Some(stored) = guard.get(&project_id) else {
            return Ok((Vec::new(), 0));
        };

        let mut matched: Vec<&Span> = stored
            .iter()
            .filter(|span| in_window(span, windowing) && filtering_matches(span, filtering))
            .collect();
        let count = matched.len();

        matched.sort_by(|a, b| {
            let ordering = a
                .start_time
                .cmp(&b.start_time)
                .then_with(|| a.span_id.cmp(&b.span_id));
            match windowing.order {
                Order::Ascending => ordering,
                Order::Descending => ordering.reverse(),
            }
        });

        if let Some(next) = windowing.next {
            matched.retain(|span| match windowing.order {
                Order::Ascending => span.start_time > next,
                Order::Descending => span.start_time < next,
            });
        }

        let limit = windowing
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .min(MAX_QUERY_LIMIT);
        matched.truncate(limit);

        Ok((matched.into_iter().cloned().collect(), count))
    }

    async fn aggregate(
        &self,
        project_id: Uuid,
        filtering: &Filtering,
        windowing: &Windowing,
    ) -> Result<Vec<Bucket>, StoreError> {
        let newest = windowing.newest.unwrap_or_else(Utc::now);
        let oldest = windowing
            .oldest
            .unwrap_or(newest - Duration::days(DEFAULT_WINDOW_DAYS));
        let interval = windowing
            .interval
            .unwrap_or(DEFAULT_ANALYTICS_INTERVAL_SECS)
            .max(1);

        let window_secs = (newest - oldest).num_seconds().max(0);
        // ceiling division; window_secs >= 0 and interval >= 1 by the
        // guards above
        let bucket_count = usize::try_from((window_secs + interval - 1) / interval)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut buckets: Vec<Bucket> = (0..bucket_count)
            .map(|i| Bucket {
                timestamp: oldest + Duration::seconds(i as i64 * interval),
                interval,
                total: Analytics::default(),
                errors: Analytics::default(),
            })
            .collect();

        let guard = self.spans.read();
        let Some(stored) = guard.get(&project_id) else {
            return Ok(buckets);
        };

        // Aggregation counts traces, so only root spans contribute; their
        // cumulative metrics already cover the whole tree.
        for span in stored {
            if !span.is_root()
                || span.start_time < oldest
                || span.start_time >= newest
                || !sampled(span.trace_id, windowing.rate)
                || !filtering_matches(span, filtering)
            {
                continue;
            }
            let idx = ((span.start_time - oldest).num_seconds() / interval) as usize;
            let Some(bucket) = buckets.get_mut(idx) else {
                continue;
            };

            let contribution = Analytics {
                count: 1,
                duration: span.duration_ms(),
                costs: cumulative_costs(span).total,
                tokens: cumulative_tokens(span).total,
            };
            bucket.total.plus(&contribution);
            if span.status_code == crate::data::types::SpanStatusCode::Error {
                bucket.errors.plus(&contribution);
            }
        }

        Ok(buckets)
    }

    async fn delete(&self, project_id: Uuid, span_ids: &[String]) -> Result<usize, StoreError> {
        let mut guard = self.spans.write();
        let Some(stored) = guard.get_mut(&project_id) else {
            return Ok(0);
        };
        let before = stored.len();
        stored.retain(|span| !span_ids.contains(&span.span_id));
        Ok(before - stored.len())
    }
}

/// In-memory sink for the legacy observability node format.
#[derive(Default)]
pub struct InMemoryNodeSink {
    nodes: RwLock<HashMap<Uuid, Vec<JsonValue>>>,
}

impl InMemoryNodeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self, project_id: Uuid) -> usize {
        self.nodes.read().get(&project_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl crate::data::store::NodeSink for InMemoryNodeSink {
    async fn insert_nodes(
        &self,
        project_id: Uuid,
        nodes: Vec<JsonValue>,
    ) -> Result<usize, StoreError> {
        let mut guard = self.nodes.write();
        let stored = guard.entry(project_id).or_default();
        let count = nodes.len();
        stored.extend(nodes);
        Ok(count)
    }
}

// ============================================================================
// WINDOWING
// ============================================================================

fn in_window(span: &Span, windowing: &Windowing) -> bool {
    if let Some(oldest) = windowing.oldest
        && span.start_time < oldest
    {
        return false;
    }
    if let Some(newest) = windowing.newest
        && span.start_time >= newest
    {
        return false;
    }
    sampled(span.trace_id, windowing.rate)
}

/// Deterministic whole-trace sampling: the same trace is kept or dropped
/// across queries for a given rate.
fn sampled(trace_id: Uuid, rate: Option<f64>) -> bool {
    let Some(rate) = rate else {
        return true;
    };
    let threshold = (rate.clamp(0.0, 1.0) * 10_000.0) as u128;
    trace_id.as_u128() % 10_000 < threshold
}

// ============================================================================
// FILTER EVALUATION
// ============================================================================

pub(crate) fn filtering_matches(span: &Span, filtering: &Filtering) -> bool {
    if filtering.conditions.is_empty() {
        return true;
    }
    let mut all = true;
    let mut any = false;
    for node in &filtering.conditions {
        let matched = match node {
            FilterNode::Nested(inner) => filtering_matches(span, inner),
            FilterNode::Leaf(condition) => condition_matches(span, condition),
        };
        all &= matched;
        any |= matched;
    }
    match filtering.operator {
        LogicalOperator::And => all,
        LogicalOperator::Or => any,
        LogicalOperator::Not | LogicalOperator::Nor => !any,
        LogicalOperator::Nand => !all,
    }
}

fn condition_matches(span: &Span, condition: &Condition) -> bool {
    match condition.field.as_str() {
        "links" | "references" | "events" => collection_matches(span, condition),
        "content" => {
            let haystack = serde_json::to_string(&span.attributes).unwrap_or_default();
            let Some(needle) = condition.value.as_ref().and_then(|v| v.as_str()) else {
                return false;
            };
            if case_sensitive(condition) {
                haystack.contains(needle)
            } else {
                haystack.to_lowercase().contains(&needle.to_lowercase())
            }
        }
        _ => scalar_matches(span, condition),
    }
}

fn scalar_matches(span: &Span, condition: &Condition) -> bool {
    let extracted = extract_scalar(span, condition);
    match condition.operator {
        ConditionOperator::Exists => extracted.is_some(),
        ConditionOperator::NotExists => extracted.is_none(),
        _ => {
            let Some(value) = condition.value.as_ref() else {
                return false;
            };
            // `parent_id is null` selects root spans
            if value.is_null() {
                return match condition.operator {
                    ConditionOperator::Is => extracted.is_none(),
                    ConditionOperator::IsNot => extracted.is_some(),
                    _ => false,
                };
            }
            let Some(extracted) = extracted else {
                return false;
            };
            apply_operator(&extracted, condition.operator, value, case_sensitive(condition))
        }
    }
}

/// Current value of a scalar field, in the same canonical rendering the
/// normalizer produces for filter values.
fn extract_scalar(span: &Span, condition: &Condition) -> Option<JsonValue> {
    match condition.field.as_str() {
        "trace_id" => Some(JsonValue::String(span.trace_id.to_string())),
        "span_id" => Some(JsonValue::String(span.span_id.clone())),
        "parent_id" => span.parent_id.clone().map(JsonValue::String),
        "trace_type" => Some(JsonValue::String(span.trace_type.as_str().to_string())),
        "span_type" => Some(JsonValue::String(span.span_type.as_str().to_string())),
        "span_kind" => Some(JsonValue::String(span.span_kind.as_str().to_string())),
        "status_code" => Some(JsonValue::String(span.status_code.as_str().to_string())),
        "span_name" => Some(JsonValue::String(span.span_name.clone())),
        "status_message" => span.status_message.clone().map(JsonValue::String),
        "start_time" => Some(canonical_time(span.start_time)),
        "end_time" => Some(canonical_time(span.end_time)),
        "created_at" => Some(canonical_time(span.created_at)),
        "updated_at" => span.updated_at.map(canonical_time),
        "deleted_at" => span.deleted_at.map(canonical_time),
        "created_by_id" => span.created_by_id.map(|id| JsonValue::String(id.to_string())),
        "updated_by_id" => span.updated_by_id.map(|id| JsonValue::String(id.to_string())),
        "deleted_by_id" => span.deleted_by_id.map(|id| JsonValue::String(id.to_string())),
        "attributes" => {
            let key = condition.key.as_deref()?;
            let segments: Vec<&str> = key.split('.').collect();
            get_path(&span.attributes, &segments).cloned()
        }
        _ => None,
    }
}

fn canonical_time(dt: DateTime<Utc>) -> JsonValue {
    JsonValue::String(dt.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn case_sensitive(condition: &Condition) -> bool {
    condition.options.map(|o| o.case_sensitive).unwrap_or(false)
}

fn apply_operator(
    extracted: &JsonValue,
    operator: ConditionOperator,
    value: &JsonValue,
    case_sensitive: bool,
) -> bool {
    use std::cmp::Ordering;
    match operator {
        ConditionOperator::Is => extracted == value,
        ConditionOperator::IsNot => extracted != value,
        ConditionOperator::Eq => compare(extracted, value) == Some(Ordering::Equal),
        ConditionOperator::Neq => {
            matches!(compare(extracted, value), Some(o) if o != Ordering::Equal)
        }
        ConditionOperator::Gt => compare(extracted, value) == Some(Ordering::Greater),
        ConditionOperator::Lt => compare(extracted, value) == Some(Ordering::Less),
        ConditionOperator::Gte => {
            matches!(compare(extracted, value), Some(o) if o != Ordering::Less)
        }
        ConditionOperator::Lte => {
            matches!(compare(extracted, value), Some(o) if o != Ordering::Greater)
        }
        ConditionOperator::Btwn => {
            let Some([low, high]) = value.as_array().and_then(|a| <&[_; 2]>::try_from(a.as_slice()).ok())
            else {
                return false;
            };
            matches!(compare(extracted, low), Some(o) if o != Ordering::Less)
                && matches!(compare(extracted, high), Some(o) if o != Ordering::Greater)
        }
        ConditionOperator::Startswith
        | ConditionOperator::Endswith
        | ConditionOperator::Contains
        | ConditionOperator::Matches
        | ConditionOperator::Like => string_operator(extracted, operator, value, case_sensitive),
        ConditionOperator::In => value
            .as_array()
            .is_some_and(|items| items.iter().any(|item| item == extracted)),
        ConditionOperator::NotIn => value
            .as_array()
            .is_some_and(|items| items.iter().all(|item| item != extracted)),
        // handled by callers
        ConditionOperator::Exists | ConditionOperator::NotExists => false,
        ConditionOperator::Has | ConditionOperator::HasNot => false,
    }
}

/// Ordering between a stored value and a filter value: numeric when both
/// sides are numbers, lexicographic when both are strings (canonical
/// RFC 3339 timestamps compare chronologically this way).
fn compare(a: &JsonValue, b: &JsonValue) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

fn string_operator(
    extracted: &JsonValue,
    operator: ConditionOperator,
    value: &JsonValue,
    case_sensitive: bool,
) -> bool {
    let (Some(text), Some(pattern)) = (extracted.as_str(), value.as_str()) else {
        return false;
    };
    let (text, pattern) = if case_sensitive || operator == ConditionOperator::Matches {
        (text.to_string(), pattern.to_string())
    } else {
        (text.to_lowercase(), pattern.to_lowercase())
    };
    match operator {
        ConditionOperator::Startswith => text.starts_with(&pattern),
        ConditionOperator::Endswith => text.ends_with(&pattern),
        ConditionOperator::Contains => text.contains(&pattern),
        ConditionOperator::Like => like_match(&pattern, &text),
        // `matches` is the always-case-insensitive wildcard variant
        ConditionOperator::Matches => {
            like_match(&pattern.to_lowercase(), &text.to_lowercase())
        }
        _ => false,
    }
}

/// SQL LIKE semantics: `%` matches any run, `_` exactly one character.
fn like_match(pattern: &str, text: &str) -> bool {
    fn inner(pattern: &[char], text: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some(('%', rest)) => (0..=text.len()).any(|i| inner(rest, &text[i..])),
            Some(('_', rest)) => !text.is_empty() && inner(rest, &text[1..]),
            Some((c, rest)) => text.first() == Some(c) && inner(rest, &text[1..]),
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    inner(&pattern, &text)
}

// ============================================================================
// COLLECTION EVALUATION
// ============================================================================

fn collection_matches(span: &Span, condition: &Condition) -> bool {
    let elements: Vec<JsonValue> = match condition.field.as_str() {
        "links" => span.links.iter().filter_map(|l| serde_json::to_value(l).ok()).collect(),
        "references" => span
            .references
            .iter()
            .filter_map(|r| serde_json::to_value(r).ok())
            .collect(),
        "events" => span.events.iter().filter_map(|e| serde_json::to_value(e).ok()).collect(),
        _ => return false,
    };

    match condition.operator {
        ConditionOperator::Exists => !elements.is_empty(),
        ConditionOperator::NotExists => elements.is_empty(),
        ConditionOperator::In | ConditionOperator::NotIn => {
            let Some(partials) = condition.value.as_ref().and_then(|v| v.as_array()) else {
                return false;
            };
            let any = elements.iter().any(|element| {
                partials
                    .iter()
                    .any(|partial| partial_object_match(element, partial))
            });
            match condition.operator {
                ConditionOperator::In => any,
                _ => !any,
            }
        }
        ConditionOperator::Has | ConditionOperator::HasNot => {
            let Some(path) = condition
                .key
                .as_deref()
                .and_then(|k| k.strip_prefix("attributes."))
            else {
                return false;
            };
            let segments: Vec<&str> = path.split('.').collect();
            let any = elements.iter().any(|element| {
                element
                    .get("attributes")
                    .and_then(|attrs| get_path(attrs, &segments))
                    .is_some_and(|found| Some(found) == condition.value.as_ref())
            });
            match condition.operator {
                ConditionOperator::Has => any,
                _ => !any,
            }
        }
        _ => false,
    }
}

/// Every key present in `partial` must equal the element's value.
fn partial_object_match(element: &JsonValue, partial: &JsonValue) -> bool {
    let Some(partial) = partial.as_object() else {
        return false;
    };
    partial
        .iter()
        .all(|(key, expected)| element.get(key) == Some(expected))
}
