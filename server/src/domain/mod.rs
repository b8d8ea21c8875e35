//! Pure domain algorithms: attribute marshalling, trace trees, pricing
//! and metric propagation. No IO, no axum, no storage.

pub mod attributes;
pub mod metrics;
pub mod pricing;
pub mod tree;
