//! Health check endpoint

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::ingest::queue::IngestQueue;

#[derive(Clone)]
pub struct HealthState {
    pub tracing_queue: IngestQueue,
    pub observability_queue: IngestQueue,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub queues: QueueDepths,
}

#[derive(Serialize)]
pub struct QueueDepths {
    pub tracing: usize,
    pub observability: usize,
}

/// Health check with queue-depth visibility for ops
pub async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            queues: QueueDepths {
                tracing: state.tracing_queue.depth(),
                observability: state.observability_queue.depth(),
            },
        }),
    )
}
