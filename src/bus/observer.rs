//! Observability sink for dispatch failures.

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::{BusError, SubscriptionId};

/// A delivery that did not complete normally.
#[derive(Debug, Clone)]
pub enum DispatchFailure {
    /// The handler returned an error.
    Failed(BusError),
    /// The handler panicked.
    Panicked(String),
    /// The handler exceeded the configured invocation timeout.
    TimedOut(Duration),
    /// The subscriber's queue was full; this delivery was dropped.
    QueueFull,
}

impl DispatchFailure {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchFailure::Failed(_) => "failed",
            DispatchFailure::Panicked(_) => "panicked",
            DispatchFailure::TimedOut(_) => "timed_out",
            DispatchFailure::QueueFull => "queue_full",
        }
    }
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchFailure::Failed(e) => write!(f, "{}", e),
            DispatchFailure::Panicked(msg) => write!(f, "handler panicked: {}", msg),
            DispatchFailure::TimedOut(d) => write!(f, "handler timed out after {:?}", d),
            DispatchFailure::QueueFull => f.write_str("subscriber queue full"),
        }
    }
}

/// Receives dispatch outcomes from a `TopicBus`.
///
/// Failures are reported here instead of being returned to the publisher.
pub trait DispatchObserver: Send + Sync {
    /// A publish completed; `queued` subscribers received the message.
    fn published(&self, _topic: &str, _queued: usize) {}

    /// A delivery to `subscription` failed.
    fn report(&self, topic: &str, subscription: SubscriptionId, failure: &DispatchFailure);
}

/// Default observer: structured logs, plus OTel counters with `otel`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn published(&self, topic: &str, queued: usize) {
        debug!(topic = %topic, queued, "Published to topic");

        #[cfg(feature = "otel")]
        {
            use crate::utils::metrics::{self, BUS_PUBLISH_TOTAL};
            BUS_PUBLISH_TOTAL.add(1, &[metrics::topic_attr(topic)]);
        }
    }

    fn report(&self, topic: &str, subscription: SubscriptionId, failure: &DispatchFailure) {
        match failure {
            DispatchFailure::QueueFull => warn!(
                topic = %topic,
                subscription = subscription.0,
                "Subscriber queue full, delivery dropped"
            ),
            _ => error!(
                topic = %topic,
                subscription = subscription.0,
                kind = failure.kind(),
                error = %failure,
                "Topic handler failed"
            ),
        }

        #[cfg(feature = "otel")]
        {
            use crate::utils::metrics::{self, BUS_HANDLER_FAILURES};
            BUS_HANDLER_FAILURES.add(
                1,
                &[metrics::topic_attr(topic), metrics::outcome_attr(failure.kind())],
            );
        }
    }
}
