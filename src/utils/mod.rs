//! Shared utilities.

pub mod bootstrap;
#[cfg(feature = "otel")]
pub mod metrics;
