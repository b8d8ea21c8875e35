//! Queue consumers
//!
//! Each queue gets one long-running worker. Workers deserialize dequeued
//! items, group them by tenant, and persist each group with a bounded
//! retry. A poison item costs only itself; a persistent store failure
//! costs only its tenant group. The tracing worker additionally re-runs
//! the quota check authoritatively before writing anything.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::constants::{
    PERSIST_RETRY_ATTEMPTS, PERSIST_RETRY_BASE_DELAY_MS, TRACES_COUNTER, WORKER_BATCH_MAX,
};
use crate::data::quota::QuotaChecker;
use crate::data::store::{NodeSink, SpanStore, StoreError};
use crate::data::types::Span;
use crate::ingest::queue::{QueueConsumer, QueueItem};

pub struct TracingWorker {
    consumer: QueueConsumer,
    store: Arc<dyn SpanStore>,
    quota: Arc<dyn QuotaChecker>,
    shutdown: watch::Receiver<bool>,
}

impl TracingWorker {
    pub fn new(
        consumer: QueueConsumer,
        store: Arc<dyn SpanStore>,
        quota: Arc<dyn QuotaChecker>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            consumer,
            store,
            quota,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(queue = self.consumer.name(), "Tracing worker started");
        loop {
            let mut shutdown = self.shutdown.clone();
            let batch = self
                .consumer
                .recv_batch(WORKER_BATCH_MAX, &mut shutdown)
                .await;
            if batch.is_empty() {
                if *self.shutdown.borrow() {
                    break;
                }
                continue;
            }
            self.process(batch).await;
        }
        tracing::info!(queue = self.consumer.name(), "Tracing worker drained and stopped");
    }

    async fn process(&self, batch: Vec<QueueItem>) {
        // organization -> project -> spans
        let mut by_org: HashMap<Uuid, HashMap<Uuid, Vec<Span>>> = HashMap::new();
        for item in batch {
            match serde_json::from_str::<Span>(&item.payload) {
                Ok(span) => {
                    by_org
                        .entry(item.tenant.organization_id)
                        .or_default()
                        .entry(item.tenant.project_id)
                        .or_default()
                        .push(span);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        project_id = %item.tenant.project_id,
                        "Dropping undeserializable queue item"
                    );
                }
            }
        }

        for (organization_id, projects) in by_org {
            let roots: u64 = projects
                .values()
                .flatten()
                .filter(|s| s.is_root())
                .count() as u64;
            if roots > 0 {
                match self
                    .quota
                    .check(organization_id, TRACES_COUNTER, roots, false)
                    .await
                {
                    Ok(decision) if !decision.allowed => {
                        let spans: usize = projects.values().map(Vec::len).sum();
                        tracing::warn!(
                            organization_id = %organization_id,
                            spans,
                            used = decision.used,
                            "Organization over trace quota, dropping batch"
                        );
                        continue;
                    }
                    Ok(_) => {}
                    // The authoritative path is fail-closed: nothing is
                    // billed and nothing is written until the quota
                    // backend answers.
                    Err(e) => {
                        let spans: usize = projects.values().map(Vec::len).sum();
                        tracing::warn!(
                            error = %e,
                            organization_id = %organization_id,
                            spans,
                            "Authoritative quota check failed, skipping organization batch"
                        );
                        continue;
                    }
                }
            }

            for (project_id, spans) in projects {
                let count = spans.len();
                let result = persist_with_retry("spans", || {
                    let spans = spans.clone();
                    async { self.store.insert(project_id, spans).await }
                })
                .await;
                if let Err(e) = result {
                    tracing::error!(
                        error = %e,
                        project_id = %project_id,
                        spans = count,
                        "Dropping span batch after exhausting retries"
                    );
                }
            }
        }
    }
}

pub struct ObservabilityWorker {
    consumer: QueueConsumer,
    sink: Arc<dyn NodeSink>,
    shutdown: watch::Receiver<bool>,
}

impl ObservabilityWorker {
    pub fn new(
        consumer: QueueConsumer,
        sink: Arc<dyn NodeSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            consumer,
            sink,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(queue = self.consumer.name(), "Observability worker started");
        loop {
            let mut shutdown = self.shutdown.clone();
            let batch = self
                .consumer
                .recv_batch(WORKER_BATCH_MAX, &mut shutdown)
                .await;
            if batch.is_empty() {
                if *self.shutdown.borrow() {
                    break;
                }
                continue;
            }
            self.process(batch).await;
        }
        tracing::info!(
            queue = self.consumer.name(),
            "Observability worker drained and stopped"
        );
    }

    async fn process(&self, batch: Vec<QueueItem>) {
        let mut by_project: HashMap<Uuid, Vec<JsonValue>> = HashMap::new();
        for item in batch {
            match serde_json::from_str::<JsonValue>(&item.payload) {
                Ok(node) => by_project
                    .entry(item.tenant.project_id)
                    .or_default()
                    .push(node),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        project_id = %item.tenant.project_id,
                        "Dropping undeserializable legacy node"
                    );
                }
            }
        }

        for (project_id, nodes) in by_project {
            let count = nodes.len();
            let result = persist_with_retry("nodes", || {
                let nodes = nodes.clone();
                async { self.sink.insert_nodes(project_id, nodes).await }
            })
            .await;
            if let Err(e) = result {
                tracing::error!(
                    error = %e,
                    project_id = %project_id,
                    nodes = count,
                    "Dropping legacy node batch after exhausting retries"
                );
            }
        }
    }
}

/// At-least-once persistence with exponential backoff. Duplicates on
/// retry are harmless, the store overwrites by span id.
async fn persist_with_retry<F, Fut, T>(what: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut last_error = None;
    for attempt in 1..=PERSIST_RETRY_ATTEMPTS {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(what, attempt, "Persist succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                last_error = Some(e);
                if attempt < PERSIST_RETRY_ATTEMPTS {
                    let delay =
                        Duration::from_millis(PERSIST_RETRY_BASE_DELAY_MS * 2_u64.pow(attempt - 1));
                    tracing::warn!(
                        error = %last_error.as_ref().unwrap(),
                        what,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Retrying persist after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| StoreError::Internal("retry loop without attempts".into())))
}
