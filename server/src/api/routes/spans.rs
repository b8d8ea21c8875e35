//! Span query, analytics and deletion endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use crate::api::types::ApiError;
use crate::query::service::QueryService;
use crate::query::windowing::{AnalyticsDto, Focus, QueryDto};

#[derive(Clone)]
pub struct SpansState {
    pub query: Arc<QueryService>,
}

pub fn routes(query: Arc<QueryService>) -> Router {
    Router::new()
        .route("/query", post(query_spans))
        .route("/analytics", post(analytics))
        .route("/", delete(delete_spans))
        .route("/traces/{trace_id}", get(get_trace))
        .with_state(SpansState { query })
}

/// Response key for the shaped page, per the requested focus
fn envelope_key(focus: Focus) -> &'static str {
    match focus {
        Focus::Node => "spans",
        Focus::Tree => "trees",
        Focus::Root => "roots",
    }
}

async fn query_spans(
    State(state): State<SpansState>,
    Path(project_id): Path<Uuid>,
    Json(dto): Json<QueryDto>,
) -> Result<Json<JsonValue>, ApiError> {
    let (shaped, count) = state.query.query(project_id, &dto).await?;
    let mut envelope = serde_json::Map::new();
    envelope.insert("version".to_string(), json!("1.0"));
    envelope.insert("count".to_string(), json!(count));
    envelope.insert(
        envelope_key(dto.formatting.focus).to_string(),
        JsonValue::Array(shaped),
    );
    Ok(Json(JsonValue::Object(envelope)))
}

async fn analytics(
    State(state): State<SpansState>,
    Path(project_id): Path<Uuid>,
    Json(dto): Json<AnalyticsDto>,
) -> Result<Json<JsonValue>, ApiError> {
    let envelope = state.query.analytics(project_id, &dto).await?;
    Ok(Json(envelope))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_ids: Option<Vec<String>>,
}

async fn delete_spans(
    State(state): State<SpansState>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<DeleteRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let mut span_ids = request.node_ids.unwrap_or_default();
    if let Some(node_id) = request.node_id {
        span_ids.push(node_id);
    }
    if span_ids.is_empty() {
        return Err(ApiError::bad_request(
            "EMPTY_DELETE",
            "Provide node_id or node_ids",
        ));
    }
    let count = state.query.delete(project_id, &span_ids).await?;
    Ok(Json(json!({ "count": count })))
}

async fn get_trace(
    State(state): State<SpansState>,
    Path((project_id, trace_id)): Path<(Uuid, String)>,
) -> Result<Json<JsonValue>, ApiError> {
    let (trees, count) = state.query.fetch_trace(project_id, &trace_id).await?;
    if count == 0 {
        return Err(ApiError::not_found(
            "TRACE_NOT_FOUND",
            format!("No spans for trace '{trace_id}'"),
        ));
    }
    Ok(Json(json!({
        "version": "1.0",
        "count": count,
        "trees": trees,
    })))
}
