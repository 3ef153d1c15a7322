//! OTel-native metrics instruments.
//!
//! Centralized metric definitions using OpenTelemetry meters.
//! All instruments are lazily initialized and feature-gated behind `otel`.
//!
//! Naming follows OTel semantic conventions (dot-separated).

use std::sync::LazyLock;

use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{global, KeyValue};

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("braid"));

// ============================================================================
// Topic Bus
// ============================================================================

/// Total publish calls.
pub static BUS_PUBLISH_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("braid.bus.publish.total")
        .with_description("Total topic publish operations")
        .build()
});

/// Handler failures (errors, panics, timeouts, dropped deliveries).
pub static BUS_HANDLER_FAILURES: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("braid.bus.handler.failures")
        .with_description("Topic handler failures reported to the observer")
        .build()
});

// ============================================================================
// Aggregator
// ============================================================================

/// Provider fetch failures.
pub static PROVIDER_FETCH_FAILURES: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("braid.provider.fetch.failures")
        .with_description("Provider fetch failures per round")
        .build()
});

/// Pages produced by aggregators.
pub static AGGREGATOR_PAGES: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("braid.aggregator.pages")
        .with_description("Pages produced by federated aggregators")
        .build()
});

// ============================================================================
// Reconciler
// ============================================================================

/// Live events dropped by the reconciler (conflicts, duplicates, rejections).
pub static RECONCILER_DROPPED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("braid.reconciler.dropped")
        .with_description("Live events dropped without mutating the feed")
        .build()
});

// ============================================================================
// Attribute helpers
// ============================================================================

/// Create a topic label.
pub fn topic_attr(topic: &str) -> KeyValue {
    KeyValue::new("topic", topic.to_string())
}

/// Create a provider label.
pub fn provider_attr(provider: &str) -> KeyValue {
    KeyValue::new("provider", provider.to_string())
}

/// Create an outcome label.
pub fn outcome_attr(outcome: &str) -> KeyValue {
    KeyValue::new("outcome", outcome.to_string())
}
