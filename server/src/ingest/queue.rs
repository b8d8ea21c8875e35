//! Bounded in-process ingestion queues
//!
//! Many HTTP handlers produce, one worker consumes. Enqueue is strictly
//! non-blocking: a full queue surfaces as backpressure to the client and
//! is the system's only flow-control mechanism. Items are serialized at
//! the boundary so a poison item can be dropped by the worker without
//! touching its neighbors.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::watch;

use crate::data::types::TenantContext;

#[derive(Error, Debug)]
#[error("ingestion queue '{queue}' is full")]
pub struct QueueFull {
    pub queue: &'static str,
}

/// One serialized span (or legacy node) with its tenant attribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub tenant: TenantContext,
    pub payload: String,
}

pub fn bounded(name: &'static str, capacity: usize) -> (IngestQueue, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    let depth = Arc::new(AtomicUsize::new(0));
    (
        IngestQueue {
            name,
            tx,
            depth: depth.clone(),
        },
        QueueConsumer { name, rx, depth },
    )
}

/// Producer half, cheap to clone into request handlers.
#[derive(Clone)]
pub struct IngestQueue {
    name: &'static str,
    tx: mpsc::Sender<QueueItem>,
    depth: Arc<AtomicUsize>,
}

impl IngestQueue {
    pub fn try_publish(&self, item: QueueItem) -> Result<(), QueueFull> {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(QueueFull { queue: self.name }),
            Err(TrySendError::Closed(_)) => {
                // Consumer gone during shutdown; report as backpressure
                tracing::warn!(queue = self.name, "Publish to closed ingestion queue");
                Err(QueueFull { queue: self.name })
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Consumer half, owned by exactly one worker loop.
pub struct QueueConsumer {
    name: &'static str,
    rx: mpsc::Receiver<QueueItem>,
    depth: Arc<AtomicUsize>,
}

impl QueueConsumer {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for at least one item, then drain up to `max` without
    /// waiting further. On shutdown the pending backlog is drained
    /// immediately; an empty return with the signal set means done.
    pub async fn recv_batch(
        &mut self,
        max: usize,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Vec<QueueItem> {
        let mut batch = Vec::new();
        if max == 0 {
            return batch;
        }

        tokio::select! {
            item = self.rx.recv() => {
                if let Some(item) = item {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                    batch.push(item);
                }
            }
            _ = shutdown.wait_for(|&stop| stop) => {}
        }

        while batch.len() < max {
            match self.rx.try_recv() {
                Ok(item) => {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                    batch.push(item);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn item(payload: &str) -> QueueItem {
        QueueItem {
            tenant: TenantContext {
                organization_id: Uuid::from_u128(1),
                project_id: Uuid::from_u128(2),
                user_id: None,
            },
            payload: payload.to_string(),
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let (queue, _consumer) = bounded("tracing", 2);
        queue.try_publish(item("a")).unwrap();
        queue.try_publish(item("b")).unwrap();

        let err = queue.try_publish(item("c")).unwrap_err();
        assert_eq!(err.queue, "tracing");
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn recv_batch_drains_up_to_max() {
        let (queue, mut consumer) = bounded("tracing", 16);
        for i in 0..5 {
            queue.try_publish(item(&i.to_string())).unwrap();
        }

        let (_tx, mut shutdown) = watch::channel(false);
        let batch = consumer.recv_batch(3, &mut shutdown).await;
        assert_eq!(batch.len(), 3);
        assert_eq!(queue.depth(), 2);

        let batch = consumer.recv_batch(10, &mut shutdown).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn shutdown_drains_backlog_immediately() {
        let (queue, mut consumer) = bounded("observability", 16);
        queue.try_publish(item("pending")).unwrap();

        let (tx, mut shutdown) = watch::channel(false);
        tx.send(true).unwrap();

        // Signal set before the call: returns the backlog without waiting
        let batch = consumer.recv_batch(10, &mut shutdown).await;
        assert_eq!(batch.len(), 1);

        let batch = consumer.recv_batch(10, &mut shutdown).await;
        assert!(batch.is_empty());
    }
}
