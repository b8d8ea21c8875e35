//! Query/analytics orchestration
//!
//! Thin coordinator: normalize the filter, fetch through the store, then
//! reshape per the requested focus and format. All heavy lifting lives in
//! the normalizer, the store and the tree builder.

use std::sync::Arc;

use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use uuid::Uuid;

use crate::data::store::{SpanStore, StoreError};
use crate::data::types::{Analytics, parse_trace_id};
use crate::domain::tree::TreeError;
use crate::query::filtering::{Condition, ConditionOperator, FilterNode, Filtering, FilteringError};
use crate::query::format::{
    group_by_trace, render_node, root_envelopes, root_grouping_id, tree_envelope,
};
use crate::query::windowing::{
    AnalyticsDto, AnalyticsFormat, Focus, Formatting, QueryDto, ResponseFormat,
};

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Filtering(#[from] FilteringError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("focus '{focus}' is not available in the '{format}' format")]
    UnsupportedShape { format: String, focus: String },
    #[error("invalid trace id '{0}'")]
    InvalidTraceId(String),
}

pub struct QueryService {
    store: Arc<dyn SpanStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn SpanStore>) -> Self {
        Self { store }
    }

    /// Filtered/windowed query, reshaped per the requested focus and
    /// format. Returns the shaped page and the total match count.
    pub async fn query(
        &self,
        project_id: Uuid,
        dto: &QueryDto,
    ) -> Result<(Vec<JsonValue>, usize), QueryError> {
        let filtering = dto.filtering.normalize()?;
        let (spans, count) = self
            .store
            .query(project_id, &filtering, &dto.windowing)
            .await?;

        let format = dto.formatting.format;
        let shaped = match (format, dto.formatting.focus) {
            (_, Focus::Node) => spans
                .iter()
                .map(|span| JsonValue::Object(render_node(span, format)))
                .collect(),
            (ResponseFormat::Agenta, Focus::Tree) => {
                let mut trees = Vec::new();
                for (trace_id, members) in group_by_trace(spans) {
                    trees.push(tree_envelope(trace_id, &members, format)?);
                }
                trees
            }
            (ResponseFormat::Agenta, Focus::Root) => {
                let mut trees = Vec::new();
                for (trace_id, members) in group_by_trace(spans) {
                    let root_id = root_grouping_id(trace_id, &members);
                    trees.push((root_id, tree_envelope(trace_id, &members, format)?));
                }
                root_envelopes(trees)
            }
            (ResponseFormat::Opentelemetry, focus) => {
                return Err(QueryError::UnsupportedShape {
                    format: "opentelemetry".to_string(),
                    focus: match focus {
                        Focus::Tree => "tree",
                        Focus::Root => "root",
                        Focus::Node => unreachable!("node handled above"),
                    }
                    .to_string(),
                });
            }
        };

        Ok((shaped, count))
    }

    /// Time-bucketed aggregation, shaped per the requested envelope.
    pub async fn analytics(
        &self,
        project_id: Uuid,
        dto: &AnalyticsDto,
    ) -> Result<JsonValue, QueryError> {
        let filtering = dto.filtering.normalize()?;
        let buckets = self
            .store
            .aggregate(project_id, &filtering, &dto.windowing)
            .await?;

        let envelope = match dto.format {
            AnalyticsFormat::Agenta => {
                let count: u64 = buckets.iter().map(|b| b.total.count).sum();
                json!({
                    "version": "1.0",
                    "count": count,
                    "buckets": buckets,
                })
            }
            AnalyticsFormat::Legacy => {
                let mut total = Analytics::default();
                let mut errors = Analytics::default();
                let data: Vec<JsonValue> = buckets
                    .iter()
                    .map(|bucket| {
                        total.plus(&bucket.total);
                        errors.plus(&bucket.errors);
                        json!({
                            "timestamp": bucket.timestamp,
                            "count": bucket.total.count,
                            "cost": bucket.total.costs,
                            "tokens": bucket.total.tokens,
                            "duration": bucket.total.duration,
                            "error_count": bucket.errors.count,
                        })
                    })
                    .collect();
                json!({
                    "data": data,
                    "total_count": total.count,
                    "total_cost": total.costs,
                    "total_tokens": total.tokens,
                    "error_count": errors.count,
                })
            }
        };
        Ok(envelope)
    }

    /// Point or bulk delete by span id.
    pub async fn delete(
        &self,
        project_id: Uuid,
        span_ids: &[String],
    ) -> Result<usize, QueryError> {
        Ok(self.store.delete(project_id, span_ids).await?)
    }

    /// Fetch one trace as a tree, accepting any external trace id form
    /// (decimal, 0x-hex, bare hex, UUID).
    pub async fn fetch_trace(
        &self,
        project_id: Uuid,
        raw_trace_id: &str,
    ) -> Result<(Vec<JsonValue>, usize), QueryError> {
        let trace_id = parse_trace_id(raw_trace_id)
            .ok_or_else(|| QueryError::InvalidTraceId(raw_trace_id.to_string()))?;

        let dto = QueryDto {
            formatting: Formatting {
                focus: Focus::Tree,
                format: ResponseFormat::Agenta,
            },
            filtering: Filtering {
                conditions: vec![FilterNode::Leaf(Condition {
                    field: "trace_id".to_string(),
                    key: None,
                    value: Some(json!(trace_id.to_string())),
                    operator: ConditionOperator::Is,
                    options: None,
                })],
                ..Default::default()
            },
            ..Default::default()
        };
        self.query(project_id, &dto).await
    }
}
