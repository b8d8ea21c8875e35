//! OTLP traces export endpoint
//!
//! Error responses here are text/plain with OTLP-appropriate status
//! codes, not the JSON `ApiError` envelope the query routes use.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceResponse;
use uuid::Uuid;

use crate::core::constants::BACKPRESSURE_RETRY_AFTER_SECS;
use crate::data::types::TenantContext;
use crate::ingest::encoding::{OtlpContentType, success_response};
use crate::ingest::service::{IngestError, IngestService};

/// Organization attribution header; defaults to the project id when absent
/// (single-tenant deployments).
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Optional acting-user attribution header
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct OtlpState {
    pub ingest: Arc<IngestService>,
}

pub fn routes(ingest: Arc<IngestService>) -> Router {
    Router::new()
        .route("/traces", post(export))
        .with_state(OtlpState { ingest })
}

pub async fn export(
    State(state): State<OtlpState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(project_id) = Uuid::parse_str(&project_id) else {
        return plain(StatusCode::BAD_REQUEST, "Invalid project_id");
    };
    let tenant = match tenant_from_headers(project_id, &headers) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };

    let content_type = OtlpContentType::from_headers(&headers);
    match state.ingest.accept(&body, content_type, &tenant).await {
        Ok(_) => success_response(
            &ExportTraceServiceResponse {
                partial_success: None,
            },
            content_type,
        ),
        Err(e) => error_response(e, content_type),
    }
}

/// Tenant attribution from path and headers. A present-but-unparseable
/// header is a client error, not something to silently default.
fn tenant_from_headers(
    project_id: Uuid,
    headers: &HeaderMap,
) -> Result<TenantContext, Response> {
    let organization_id = match header_uuid(headers, ORGANIZATION_HEADER)? {
        Some(id) => id,
        None => project_id,
    };
    let user_id = header_uuid(headers, USER_HEADER)?;
    Ok(TenantContext {
        organization_id,
        project_id,
        user_id,
    })
}

fn header_uuid(headers: &HeaderMap, name: &'static str) -> Result<Option<Uuid>, Response> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(Some)
        .ok_or_else(|| plain(StatusCode::BAD_REQUEST, format!("Invalid {name} header")))
}

fn error_response(e: IngestError, content_type: OtlpContentType) -> Response {
    match e {
        IngestError::PayloadTooLarge { size, limit } => {
            tracing::warn!(size, limit, "Rejected oversized OTLP payload");
            plain(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large")
        }
        IngestError::Malformed(e) => {
            tracing::warn!(
                error = %e,
                content_type = content_type.as_header_value(),
                "Failed to decode OTLP request"
            );
            plain(StatusCode::BAD_REQUEST, "Failed to decode request")
        }
        IngestError::Conversion(e) => {
            tracing::error!(error = %e, "Failed to convert OTLP spans");
            plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to convert spans",
            )
        }
        IngestError::Serialization(e) => {
            tracing::error!(error = %e, "Failed to serialize spans for enqueue");
            plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to serialize spans",
            )
        }
        IngestError::QuotaDenied { used, limit } => {
            tracing::warn!(used, limit, "Rejected ingestion over trace quota");
            plain(StatusCode::FORBIDDEN, "Trace quota exceeded")
        }
        IngestError::Backpressure => (
            StatusCode::TOO_MANY_REQUESTS,
            [(
                HeaderName::from_static("retry-after"),
                BACKPRESSURE_RETRY_AFTER_SECS.to_string(),
            )],
            "Ingestion queue full, retry later",
        )
            .into_response(),
    }
}

fn plain(status: StatusCode, message: impl Into<String>) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], message.into()).into_response()
}
