//! OTLP ingestion pipeline
//!
//! Receiver-side work (decode, convert, propagate, soft quota, enqueue)
//! lives in [`service`]; persistence is deferred to the per-queue
//! [`worker`]s connected by the bounded [`queue`]s.

pub mod convert;
pub mod encoding;
pub mod queue;
pub mod service;
pub mod worker;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Bytes;
    use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
    use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as OtlpSpan};
    use prost::Message;
    use tokio::sync::watch;
    use uuid::Uuid;

    use crate::data::memory::{InMemoryNodeSink, InMemorySpanStore};
    use crate::data::quota::UnmeteredQuota;
    use crate::data::store::SpanStore;
    use crate::data::types::TenantContext;
    use crate::domain::metrics::{MetricsPropagator, cumulative_costs, cumulative_tokens};
    use crate::domain::pricing::PricingTable;
    use crate::ingest::encoding::OtlpContentType;
    use crate::ingest::queue::bounded;
    use crate::ingest::service::IngestService;
    use crate::ingest::worker::{ObservabilityWorker, TracingWorker};
    use crate::query::filtering::Filtering;
    use crate::query::windowing::Windowing;

    fn attr(key: &str, value: any_value::Value) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue { value: Some(value) }),
        }
    }

    fn string_attr(key: &str, value: &str) -> KeyValue {
        attr(key, any_value::Value::StringValue(value.to_string()))
    }

    fn int_attr(key: &str, value: i64) -> KeyValue {
        attr(key, any_value::Value::IntValue(value))
    }

    fn otlp_span(
        span_id: u64,
        parent: Option<u64>,
        name: &str,
        attributes: Vec<KeyValue>,
    ) -> OtlpSpan {
        OtlpSpan {
            trace_id: Uuid::from_u128(42).into_bytes().to_vec(),
            span_id: span_id.to_be_bytes().to_vec(),
            trace_state: String::new(),
            parent_span_id: parent.map(|p| p.to_be_bytes().to_vec()).unwrap_or_default(),
            flags: 0,
            name: name.to_string(),
            kind: 1,
            start_time_unix_nano: 1_700_000_000_000_000_000 + span_id,
            end_time_unix_nano: 1_700_000_001_000_000_000,
            attributes,
            dropped_attributes_count: 0,
            events: vec![],
            dropped_events_count: 0,
            links: vec![],
            dropped_links_count: 0,
            status: None,
        }
    }

    /// Whole pipeline: OTLP body in, priced and accumulated spans plus
    /// legacy nodes in their stores out.
    #[tokio::test]
    async fn export_request_flows_through_to_both_stores() {
        let (tracing_queue, tracing_consumer) = bounded("tracing", 64);
        let (observability_queue, observability_consumer) = bounded("observability", 64);
        let store = Arc::new(InMemorySpanStore::new());
        let sink = Arc::new(InMemoryNodeSink::new());
        let quota = Arc::new(UnmeteredQuota);

        let service = IngestService::new(
            MetricsPropagator::new(Arc::new(PricingTable::embedded().unwrap())),
            quota.clone(),
            tracing_queue,
            observability_queue,
        );

        // workflow -> (chat with 10 prompt/5 completion tokens, plain task)
        let request = ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: None,
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans: vec![
                        otlp_span(1, None, "workflow", vec![string_attr("ag.type.span", "workflow")]),
                        otlp_span(
                            2,
                            Some(1),
                            "step_a",
                            vec![
                                string_attr("ag.type.span", "chat"),
                                string_attr("ag.meta.response.model", "gpt-4-turbo"),
                                int_attr("ag.metrics.tokens.incremental.prompt", 10),
                                int_attr("ag.metrics.tokens.incremental.completion", 5),
                                int_attr("ag.metrics.tokens.incremental.total", 15),
                            ],
                        ),
                        otlp_span(3, Some(1), "step_b", vec![string_attr("ag.type.span", "task")]),
                    ],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        };
        let body = Bytes::from(request.encode_to_vec());

        let tenant = TenantContext {
            organization_id: Uuid::from_u128(1),
            project_id: Uuid::from_u128(2),
            user_id: None,
        };
        let receipt = service
            .accept(&body, OtlpContentType::Protobuf, &tenant)
            .await
            .unwrap();
        assert_eq!(receipt.spans, 3);
        assert_eq!(receipt.roots, 1);

        // Run both workers to completion over the enqueued backlog
        let (tx, shutdown) = watch::channel(false);
        tx.send(true).unwrap();
        TracingWorker::new(tracing_consumer, store.clone(), quota, shutdown.clone())
            .run()
            .await;
        ObservabilityWorker::new(observability_consumer, sink.clone(), shutdown)
            .run()
            .await;

        let (spans, count) = store
            .query(tenant.project_id, &Filtering::default(), &Windowing::default())
            .await
            .unwrap();
        assert_eq!(count, 3);

        // gpt-4-turbo: 10 * 1e-5 prompt + 5 * 3e-5 completion
        let root = spans.iter().find(|s| s.is_root()).unwrap();
        let costs = cumulative_costs(root);
        assert!((costs.total - 2.5e-4).abs() < 1e-12);
        assert_eq!(cumulative_tokens(root).total, 15.0);

        let step_a = spans.iter().find(|s| s.span_name == "step_a").unwrap();
        assert!((cumulative_costs(step_a).total - 2.5e-4).abs() < 1e-12);

        let step_b = spans.iter().find(|s| s.span_name == "step_b").unwrap();
        assert!(cumulative_costs(step_b).is_zero());

        assert_eq!(sink.node_count(tenant.project_id), 3);
    }
}
