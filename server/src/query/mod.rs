//! Query side: filter normalization, windowing, response shaping and the
//! orchestrating service.

pub mod filtering;
pub mod format;
pub mod service;
pub mod windowing;
