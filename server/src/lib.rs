//! Tracelake: OTLP span ingestion and query engine for LLM observability

pub mod api;
pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod ingest;
pub mod query;
