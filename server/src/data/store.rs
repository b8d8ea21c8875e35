//! Storage DAO trait for the span store
//!
//! The engine treats persistence as an external collaborator behind this
//! trait: filtering and windowing are handed over already normalized, and
//! the backend owns evaluation, ordering and aggregation.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::data::types::{Bucket, Span};
use crate::query::filtering::Filtering;
use crate::query::windowing::Windowing;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation failed: {0}")]
    Internal(String),
}

#[async_trait]
pub trait SpanStore: Send + Sync {
    /// Batch insert; spans arrive with metrics already propagated.
    async fn insert(&self, project_id: Uuid, spans: Vec<Span>) -> Result<usize, StoreError>;

    /// Filtered/windowed/ordered fetch. Returns the page and the total
    /// match count before pagination.
    async fn query(
        &self,
        project_id: Uuid,
        filtering: &Filtering,
        windowing: &Windowing,
    ) -> Result<(Vec<Span>, usize), StoreError>;

    /// Time-bucketed aggregation over root spans.
    async fn aggregate(
        &self,
        project_id: Uuid,
        filtering: &Filtering,
        windowing: &Windowing,
    ) -> Result<Vec<Bucket>, StoreError>;

    /// Delete by span id; returns the number of spans removed.
    async fn delete(&self, project_id: Uuid, span_ids: &[String]) -> Result<usize, StoreError>;
}

/// Sink for the legacy observability node format. Kept separate from the
/// span store: the two queues persist independently and a deployment may
/// route nodes elsewhere entirely.
#[async_trait]
pub trait NodeSink: Send + Sync {
    async fn insert_nodes(
        &self,
        project_id: Uuid,
        nodes: Vec<serde_json::Value>,
    ) -> Result<usize, StoreError>;
}
