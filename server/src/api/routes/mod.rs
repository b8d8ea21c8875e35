//! HTTP route handlers

pub mod health;
pub mod otlp;
pub mod spans;
