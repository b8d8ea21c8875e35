//! Query request DTOs: formatting, windowing and the combined envelopes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::query::filtering::Filtering;

/// Grouping granularity of a query response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Focus {
    #[default]
    Node,
    Tree,
    Root,
}

/// Response span shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Opentelemetry,
    #[default]
    Agenta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Formatting {
    #[serde(default)]
    pub focus: Focus,
    #[serde(default)]
    pub format: ResponseFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Ascending,
    #[default]
    Descending,
}

/// Pagination, sampling and time-range parameters.
///
/// `newest`/`oldest` bound `start_time` (half-open, `oldest <= t < newest`).
/// `next` is the continuation token from a previous page: spans strictly
/// beyond it in the requested order. `rate` samples whole traces
/// deterministically; `interval` is the analytics bucket width in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Windowing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub order: Order,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueryDto {
    #[serde(default)]
    pub formatting: Formatting,
    #[serde(default)]
    pub windowing: Windowing,
    #[serde(default)]
    pub filtering: Filtering,
}

/// Analytics response envelope shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsFormat {
    Legacy,
    #[default]
    Agenta,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AnalyticsDto {
    #[serde(default)]
    pub format: AnalyticsFormat,
    #[serde(default)]
    pub windowing: Windowing,
    #[serde(default)]
    pub filtering: Filtering,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_dto_defaults() {
        let dto: QueryDto = serde_json::from_value(json!({})).unwrap();
        assert_eq!(dto.formatting.focus, Focus::Node);
        assert_eq!(dto.formatting.format, ResponseFormat::Agenta);
        assert_eq!(dto.windowing.order, Order::Descending);
        assert!(dto.filtering.is_empty());
    }

    #[test]
    fn query_dto_parses_full_envelope() {
        let dto: QueryDto = serde_json::from_value(json!({
            "formatting": {"focus": "tree", "format": "opentelemetry"},
            "windowing": {
                "oldest": "2024-05-01T00:00:00Z",
                "newest": "2024-05-02T00:00:00Z",
                "limit": 50,
                "order": "ascending",
            },
            "filtering": {
                "conditions": [
                    {"field": "span_type", "operator": "is", "value": "chat"},
                ]
            }
        }))
        .unwrap();

        assert_eq!(dto.formatting.focus, Focus::Tree);
        assert_eq!(dto.formatting.format, ResponseFormat::Opentelemetry);
        assert_eq!(dto.windowing.limit, Some(50));
        assert_eq!(dto.windowing.order, Order::Ascending);
        assert_eq!(dto.filtering.conditions.len(), 1);
    }
}
