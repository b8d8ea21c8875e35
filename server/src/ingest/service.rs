//! Ingestion front door
//!
//! Everything that must happen while the client is still on the line:
//! size limit, decode, conversion, metric propagation, the soft quota
//! check, and enqueueing. Persistence happens later, in the workers.

use std::sync::Arc;

use axum::body::Bytes;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use thiserror::Error;

use crate::core::constants::{MAX_OTLP_BATCH_SIZE, TRACES_COUNTER};
use crate::data::quota::QuotaChecker;
use crate::data::types::TenantContext;
use crate::domain::metrics::MetricsPropagator;
use crate::ingest::convert::{ConvertError, LegacyNode, convert_request};
use crate::ingest::encoding::{DecodeError, OtlpContentType, decode_request};
use crate::ingest::queue::{IngestQueue, QueueItem};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Malformed(#[from] DecodeError),
    #[error(transparent)]
    Conversion(#[from] ConvertError),
    #[error("organization is over its trace quota ({used} used, limit {limit})")]
    QuotaDenied { used: u64, limit: u64 },
    #[error("failed to serialize span for enqueue: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("ingestion queue is full, retry later")]
    Backpressure,
}

/// What the receiver accepted, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReceipt {
    pub spans: usize,
    pub roots: u64,
}

pub struct IngestService {
    propagator: MetricsPropagator,
    quota: Arc<dyn QuotaChecker>,
    tracing_queue: IngestQueue,
    observability_queue: IngestQueue,
}

impl IngestService {
    pub fn new(
        propagator: MetricsPropagator,
        quota: Arc<dyn QuotaChecker>,
        tracing_queue: IngestQueue,
        observability_queue: IngestQueue,
    ) -> Self {
        Self {
            propagator,
            quota,
            tracing_queue,
            observability_queue,
        }
    }

    /// Accept one OTLP export request. The size limit applies to the raw
    /// body and is checked before any parsing, so an oversized body is
    /// rejected as oversized even when it is also malformed.
    pub async fn accept(
        &self,
        body: &Bytes,
        content_type: OtlpContentType,
        tenant: &TenantContext,
    ) -> Result<IngestReceipt, IngestError> {
        if body.len() > MAX_OTLP_BATCH_SIZE {
            return Err(IngestError::PayloadTooLarge {
                size: body.len(),
                limit: MAX_OTLP_BATCH_SIZE,
            });
        }

        let request: ExportTraceServiceRequest = decode_request(body, content_type)?;
        let mut spans = convert_request(&request, tenant)?;
        self.propagator.propagate(&mut spans);

        let roots = spans.iter().filter(|s| s.is_root()).count() as u64;
        if roots > 0 {
            // Soft check against the cached counters; the worker re-runs
            // it authoritatively before persisting. A quota backend error
            // is best-effort-allow here.
            match self
                .quota
                .check(tenant.organization_id, TRACES_COUNTER, roots, true)
                .await
            {
                Ok(decision) if !decision.allowed => {
                    return Err(IngestError::QuotaDenied {
                        used: decision.used,
                        limit: decision.limit.unwrap_or(0),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        organization_id = %tenant.organization_id,
                        "Quota check failed at the receiver, allowing ingestion"
                    );
                }
            }
        }

        // Success requires every span in both queues; a full queue on
        // either side fails the whole request as backpressure and the
        // client retries the batch.
        let accepted = spans.len();
        for span in &spans {
            self.tracing_queue
                .try_publish(QueueItem {
                    tenant: *tenant,
                    payload: serde_json::to_string(span)?,
                })
                .map_err(|e| {
                    tracing::warn!(queue = e.queue, span_id = %span.span_id, "Ingestion queue full");
                    IngestError::Backpressure
                })?;

            self.observability_queue
                .try_publish(QueueItem {
                    tenant: *tenant,
                    payload: serde_json::to_string(&LegacyNode::from_span(span))?,
                })
                .map_err(|e| {
                    tracing::warn!(queue = e.queue, span_id = %span.span_id, "Ingestion queue full");
                    IngestError::Backpressure
                })?;
        }

        tracing::debug!(
            spans = accepted,
            roots,
            project_id = %tenant.project_id,
            "Accepted OTLP export request"
        );
        Ok(IngestReceipt {
            spans: accepted,
            roots,
        })
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as OtlpSpan};
    use prost::Message;
    use uuid::Uuid;

    use super::*;
    use crate::data::quota::FixedQuota;
    use crate::data::types::Span;
    use crate::domain::pricing::PricingTable;
    use crate::ingest::queue::{QueueConsumer, bounded};

    fn tenant() -> TenantContext {
        TenantContext {
            organization_id: Uuid::from_u128(10),
            project_id: Uuid::from_u128(20),
            user_id: None,
        }
    }

    fn service(
        quota_limit: u64,
        tracing_capacity: usize,
        observability_capacity: usize,
    ) -> (IngestService, QueueConsumer, QueueConsumer) {
        let (tracing_queue, tracing_consumer) = bounded("tracing", tracing_capacity);
        let (observability_queue, observability_consumer) =
            bounded("observability", observability_capacity);
        let service = IngestService::new(
            MetricsPropagator::new(Arc::new(PricingTable::embedded().unwrap())),
            Arc::new(FixedQuota::new(quota_limit)),
            tracing_queue,
            observability_queue,
        );
        (service, tracing_consumer, observability_consumer)
    }

    fn string_attr(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(value.to_string())),
            }),
        }
    }

    fn otlp_span(trace: u128, span_id: u64, parent: Option<u64>) -> OtlpSpan {
        OtlpSpan {
            trace_id: Uuid::from_u128(trace).into_bytes().to_vec(),
            span_id: span_id.to_be_bytes().to_vec(),
            trace_state: String::new(),
            parent_span_id: parent.map(|p| p.to_be_bytes().to_vec()).unwrap_or_default(),
            flags: 0,
            name: format!("span-{span_id}"),
            kind: 1,
            start_time_unix_nano: 1_700_000_000_000_000_000,
            end_time_unix_nano: 1_700_000_000_100_000_000,
            attributes: vec![string_attr("ag.type.span", "task")],
            dropped_attributes_count: 0,
            events: vec![],
            dropped_events_count: 0,
            links: vec![],
            dropped_links_count: 0,
            status: None,
        }
    }

    fn body(spans: Vec<OtlpSpan>) -> Bytes {
        let request = ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: None,
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans,
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        };
        Bytes::from(request.encode_to_vec())
    }

    #[tokio::test]
    async fn accepts_and_enqueues_both_representations() {
        let (service, mut tracing_rx, mut observability_rx) = service(100, 16, 16);
        let body = body(vec![otlp_span(1, 1, None), otlp_span(1, 2, Some(1))]);

        let receipt = service
            .accept(&body, OtlpContentType::Protobuf, &tenant())
            .await
            .unwrap();
        assert_eq!(receipt.spans, 2);
        assert_eq!(receipt.roots, 1);

        let (_tx, mut shutdown) = tokio::sync::watch::channel(false);
        let batch = tracing_rx.recv_batch(10, &mut shutdown).await;
        assert_eq!(batch.len(), 2);
        let span: Span = serde_json::from_str(&batch[0].payload).unwrap();
        assert_eq!(span.trace_id, Uuid::from_u128(1));

        let batch = observability_rx.recv_batch(10, &mut shutdown).await;
        assert_eq!(batch.len(), 2);
        let node: LegacyNode = serde_json::from_str(&batch[0].payload).unwrap();
        assert_eq!(node.trace_id, Uuid::from_u128(1).to_string());
    }

    #[tokio::test]
    async fn size_limit_wins_over_malformed_body() {
        let (service, _t, _o) = service(100, 16, 16);
        let oversized = Bytes::from(vec![0xffu8; MAX_OTLP_BATCH_SIZE + 1]);

        let err = service
            .accept(&oversized, OtlpContentType::Protobuf, &tenant())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (service, _t, _o) = service(100, 16, 16);
        let err = service
            .accept(
                &Bytes::from("{ not json"),
                OtlpContentType::Json,
                &tenant(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Malformed(_)));
    }

    #[tokio::test]
    async fn quota_denied_when_over_limit() {
        let (service, _t, _o) = service(1, 16, 16);
        let quota = &service.quota;
        // exhaust the organization's allowance authoritatively
        quota
            .check(tenant().organization_id, TRACES_COUNTER, 1, false)
            .await
            .unwrap();

        let err = service
            .accept(
                &body(vec![otlp_span(1, 1, None)]),
                OtlpContentType::Protobuf,
                &tenant(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::QuotaDenied { used: 1, limit: 1 }));
    }

    #[tokio::test]
    async fn full_tracing_queue_is_backpressure() {
        let (service, _tracing_rx, _observability_rx) = service(100, 1, 16);
        let body = body(vec![otlp_span(1, 1, None), otlp_span(1, 2, Some(1))]);

        let err = service
            .accept(&body, OtlpContentType::Protobuf, &tenant())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Backpressure));
    }

    #[tokio::test]
    async fn full_observability_queue_is_backpressure() {
        let (service, _tracing_rx, _observability_rx) = service(100, 16, 1);
        let body = body(vec![otlp_span(1, 1, None), otlp_span(1, 2, Some(1))]);

        let err = service
            .accept(&body, OtlpContentType::Protobuf, &tenant())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Backpressure));
    }
}
