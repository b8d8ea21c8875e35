//! Shared API types
//!
//! Error handling common to the query-side endpoints. The OTLP receiver
//! speaks its own text/plain error dialect, see `routes/otlp.rs`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::data::store::StoreError;
use crate::query::service::QueryError;

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: String, message: String },
    NotFound { code: String, message: String },
    ServiceUnavailable { message: String },
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Filtering(e) => Self::bad_request("INVALID_FILTER", e.to_string()),
            QueryError::InvalidTraceId(raw) => {
                Self::bad_request("INVALID_TRACE_ID", format!("Invalid trace id '{raw}'"))
            }
            QueryError::UnsupportedShape { .. } => {
                Self::bad_request("UNSUPPORTED_SHAPE", e.to_string())
            }
            QueryError::Tree(e) => {
                tracing::error!(error = %e, "Stored spans produced an invalid trace tree");
                Self::internal("Trace tree construction failed")
            }
            QueryError::Store(StoreError::Unavailable(e)) => {
                tracing::warn!(error = %e, "Store unavailable");
                Self::service_unavailable("Storage temporarily unavailable")
            }
            QueryError::Store(StoreError::Internal(e)) => {
                tracing::error!(error = %e, "Store error");
                Self::internal("Storage operation failed")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match self {
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, "bad_request", code, message)
            }
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, "not_found", code, message),
            Self::ServiceUnavailable { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "SERVICE_UNAVAILABLE".to_string(),
                message,
            ),
            Self::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "INTERNAL".to_string(),
                message,
            ),
        };
        (
            status,
            Json(serde_json::json!({
                "error": error_type,
                "code": code,
                "message": message
            })),
        )
            .into_response()
    }
}
