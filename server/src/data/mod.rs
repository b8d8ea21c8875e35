//! Data layer: span record types, storage traits and in-memory backends.

pub mod memory;
pub mod quota;
pub mod store;
pub mod types;
