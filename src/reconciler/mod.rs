//! Reconciling live events into a materialized feed.
//!
//! The reconciler subscribes to an entity type's `created` / `updated` /
//! `deleted` topics and patches a `MaterializedFeed` without refetching:
//!
//! - created: insert at the ordered position unless the identity is present
//! - updated: replace if present, moving it if its sort key changed,
//!   otherwise drop
//! - deleted: remove if present, otherwise no-op
//!
//! Every operation is idempotent under redelivery. Events for absent
//! identities are conflicts: logged at debug, counted, never escalated.
//! Events apply only while the bridge's `ListenGate` is open for their
//! scope, so nothing lands after `stop_listen` returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::bridge::ListenGate;
use crate::bus::{handler_fn, BusError, Message, SubscriptionHandle, Topic, TopicBus};
use crate::model::{topic_name, EventKind, ItemIdentity, LiveEvent, MaterializedItem};

mod feed;
mod materializer;

pub use feed::{FeedChange, MaterializedFeed};
pub use materializer::{BodyMaterializer, EventMaterializer};

/// Result type for reconciler operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors from reconciling an event.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReconcileError {
    /// The event references an identity the feed does not hold.
    #[error("{kind} event for absent item {identity}")]
    Conflict { identity: ItemIdentity, kind: EventKind },

    /// The event body could not be turned into a feed item.
    #[error("Cannot materialize event: {0}")]
    Materialize(String),
}

/// Reconciler configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Body field holding the item timestamp.
    pub timestamp_field: String,
    /// Unread change notifications kept per receiver.
    pub change_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            timestamp_field: "updatedAt".to_string(),
            change_capacity: 256,
        }
    }
}

/// What applying one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Inserted(usize),
    Replaced(usize),
    Removed(usize),
    /// Created event for an identity already in the feed.
    Duplicate,
    /// Updated or deleted event for an identity not in the feed.
    Conflict,
    /// The listen gate was closed for the event's scope.
    Rejected,
    /// The event type is not created/updated/deleted.
    Ignored,
}

/// Applies live events to a `MaterializedFeed`.
pub struct Reconciler {
    feed: Arc<MaterializedFeed>,
    materializer: Arc<dyn EventMaterializer>,
    gate: ListenGate,
    subscriptions: Mutex<Vec<(Arc<Topic>, SubscriptionHandle)>>,
    conflicts: AtomicU64,
}

impl Reconciler {
    /// Create a reconciler that applies events only while `gate` is open for
    /// their scope. Pass `LiveChannelBridge::gate()`.
    pub fn new(
        feed: Arc<MaterializedFeed>,
        materializer: Arc<dyn EventMaterializer>,
        gate: ListenGate,
    ) -> Self {
        Self {
            feed,
            materializer,
            gate,
            subscriptions: Mutex::new(Vec::new()),
            conflicts: AtomicU64::new(0),
        }
    }

    pub fn feed(&self) -> &Arc<MaterializedFeed> {
        &self.feed
    }

    /// Conflicting events dropped so far.
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Apply one event.
    ///
    /// Only materialization failures are errors; conflicts and duplicates are
    /// reported through the outcome.
    pub fn apply(&self, event: &LiveEvent) -> Result<ReconcileOutcome> {
        let Some(kind) = event.kind() else {
            warn!(event_type = %event.event_type, "Unknown live event type ignored");
            return Ok(ReconcileOutcome::Ignored);
        };

        let item = match kind {
            EventKind::Created | EventKind::Updated => Some(self.materializer.materialize(event)?),
            EventKind::Deleted => None,
        };

        let outcome = self
            .gate
            .run_if_open(&event.scope_key, || self.apply_kind(kind, event, item))
            .unwrap_or(ReconcileOutcome::Rejected);

        debug!(
            identity = %event.identity(),
            kind = %kind,
            outcome = ?outcome,
            "Live event reconciled"
        );
        Ok(outcome)
    }

    fn apply_kind(
        &self,
        kind: EventKind,
        event: &LiveEvent,
        item: Option<MaterializedItem>,
    ) -> ReconcileOutcome {
        let applied = match (kind, item) {
            (EventKind::Created, Some(item)) => {
                return match self.feed.insert(item) {
                    Some(index) => ReconcileOutcome::Inserted(index),
                    None => {
                        self.record_drop("duplicate");
                        ReconcileOutcome::Duplicate
                    }
                };
            }
            (EventKind::Updated, Some(item)) => self.feed.replace(item).map(ReconcileOutcome::Replaced),
            _ => self.feed.remove(&event.identity()).map(ReconcileOutcome::Removed),
        };

        applied.unwrap_or_else(|| {
            let conflict = ReconcileError::Conflict {
                identity: event.identity(),
                kind,
            };
            debug!(error = %conflict, "Reconciliation conflict dropped");
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            self.record_drop("conflict");
            ReconcileOutcome::Conflict
        })
    }

    #[allow(unused_variables)]
    fn record_drop(&self, reason: &'static str) {
        #[cfg(feature = "otel")]
        {
            use crate::utils::metrics::{self, RECONCILER_DROPPED};
            RECONCILER_DROPPED.add(1, &[metrics::outcome_attr(reason)]);
        }
    }

    /// Subscribe to `entity_type`'s created, updated and deleted topics.
    ///
    /// Subscriptions hold the reconciler weakly and end on `detach` or drop.
    pub fn attach(self: &Arc<Self>, bus: &TopicBus, entity_type: &str) {
        let mut subscriptions = self.subscriptions.lock();

        for kind in EventKind::ALL {
            let topic = bus.topic(&topic_name(entity_type, kind));
            let weak: Weak<Self> = Arc::downgrade(self);
            let handle = topic.subscribe(handler_fn(move |message: Arc<Message>| {
                let weak = weak.clone();
                async move {
                    let (Some(reconciler), Some(event)) = (weak.upgrade(), message.as_live())
                    else {
                        return Ok(());
                    };
                    reconciler
                        .apply(event)
                        .map(|_| ())
                        .map_err(|e| BusError::Handler(e.to_string()))
                }
            }));
            subscriptions.push((topic, handle));
        }

        debug!(entity_type = %entity_type, "Reconciler attached");
    }

    /// Drop every bus subscription.
    pub fn detach(&self) {
        for (topic, handle) in self.subscriptions.lock().drain(..) {
            topic.unsubscribe(&handle);
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.detach();
    }
}
