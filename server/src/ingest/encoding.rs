//! OTLP content-type encoding and decoding
//!
//! Supports both protobuf (application/x-protobuf) and JSON
//! (application/json) per the OpenTelemetry Protocol specification.

use std::fmt;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use prost::Message;
use serde::{Deserialize, Serialize};

/// Content type for OTLP requests/responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtlpContentType {
    Protobuf,
    Json,
}

impl OtlpContentType {
    /// Parse content type from HTTP headers.
    /// Defaults to protobuf if content type is missing or unrecognized.
    #[inline]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if content_type.starts_with("application/json") {
            OtlpContentType::Json
        } else {
            OtlpContentType::Protobuf
        }
    }

    #[inline]
    pub fn as_header_value(self) -> &'static str {
        match self {
            OtlpContentType::Protobuf => "application/x-protobuf",
            OtlpContentType::Json => "application/json",
        }
    }
}

/// Decode an OTLP request from bytes based on content type
#[inline]
pub fn decode_request<T>(body: &Bytes, content_type: OtlpContentType) -> Result<T, DecodeError>
where
    T: Message + Default + for<'de> Deserialize<'de>,
{
    match content_type {
        OtlpContentType::Protobuf => {
            T::decode(body.as_ref()).map_err(|e| DecodeError::Protobuf(e.to_string()))
        }
        OtlpContentType::Json => {
            serde_json::from_slice(body.as_ref()).map_err(|e| DecodeError::Json(e.to_string()))
        }
    }
}

fn encode_response<T>(response: &T, content_type: OtlpContentType) -> Result<Vec<u8>, String>
where
    T: Message + Serialize,
{
    match content_type {
        OtlpContentType::Protobuf => Ok(response.encode_to_vec()),
        OtlpContentType::Json => serde_json::to_vec(response).map_err(|e| e.to_string()),
    }
}

/// Create a successful OTLP response with the correct content type
pub fn success_response<T>(response: &T, content_type: OtlpContentType) -> Response
where
    T: Message + Serialize,
{
    match encode_response(response, content_type) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type.as_header_value())],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode OTLP response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                "Internal server error",
            )
                .into_response()
        }
    }
}

/// Error returned when decoding fails
#[derive(Debug)]
pub enum DecodeError {
    Protobuf(String),
    Json(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Protobuf(e) => write!(f, "protobuf decode error: {}", e),
            DecodeError::Json(e) => write!(f, "JSON decode error: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::collector::trace::v1::{
        ExportTraceServiceRequest, ExportTraceServiceResponse,
    };

    use super::*;

    #[test]
    fn content_type_detection() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            OtlpContentType::from_headers(&headers),
            OtlpContentType::Protobuf
        );

        headers.insert(
            header::CONTENT_TYPE,
            "application/json; charset=utf-8".parse().unwrap(),
        );
        assert_eq!(
            OtlpContentType::from_headers(&headers),
            OtlpContentType::Json
        );

        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert_eq!(
            OtlpContentType::from_headers(&headers),
            OtlpContentType::Protobuf
        );
    }

    #[test]
    fn decode_protobuf_roundtrip() {
        let request = ExportTraceServiceRequest {
            resource_spans: vec![],
        };
        let bytes = Bytes::from(request.encode_to_vec());

        let decoded: ExportTraceServiceRequest =
            decode_request(&bytes, OtlpContentType::Protobuf).unwrap();
        assert_eq!(decoded.resource_spans.len(), 0);
    }

    #[test]
    fn decode_json() {
        let bytes = Bytes::from(r#"{"resourceSpans":[]}"#);
        let decoded: ExportTraceServiceRequest =
            decode_request(&bytes, OtlpContentType::Json).unwrap();
        assert_eq!(decoded.resource_spans.len(), 0);
    }

    #[test]
    fn decode_invalid_bodies() {
        let bytes = Bytes::from("not valid protobuf");
        let result: Result<ExportTraceServiceRequest, _> =
            decode_request(&bytes, OtlpContentType::Protobuf);
        assert!(matches!(result.unwrap_err(), DecodeError::Protobuf(_)));

        let result: Result<ExportTraceServiceRequest, _> =
            decode_request(&bytes, OtlpContentType::Json);
        assert!(matches!(result.unwrap_err(), DecodeError::Json(_)));
    }

    #[test]
    fn empty_body_is_valid_protobuf_but_not_json() {
        let bytes = Bytes::new();
        let decoded: ExportTraceServiceRequest =
            decode_request(&bytes, OtlpContentType::Protobuf).unwrap();
        assert_eq!(decoded.resource_spans.len(), 0);

        let result: Result<ExportTraceServiceRequest, _> =
            decode_request(&bytes, OtlpContentType::Json);
        assert!(result.is_err());
    }

    #[test]
    fn success_response_matches_request_content_type() {
        let response = ExportTraceServiceResponse {
            partial_success: None,
        };
        let http = success_response(&response, OtlpContentType::Json);
        assert_eq!(http.status(), StatusCode::OK);
        assert_eq!(
            http.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
