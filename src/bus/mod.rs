//! Topic bus for in-process publish/subscribe.
//!
//! This module contains:
//! - `TopicBus`: registry of named topics, created lazily on lookup
//! - `Topic`: ordered subscriber list with fire-and-forget publish
//! - `TopicHandler` trait: asynchronous message handlers
//! - `Message`: payloads carried on the bus
//! - Bus configuration
//!
//! A bus is an explicit service instance. Applications normally build one at
//! startup and share it via `Arc` for the life of the process; topics are never
//! torn down. Tests build isolated buses.
//!
//! Delivery is at-most-once with no replay: a publish reaches only the
//! subscribers registered at that moment. Each subscription owns a bounded queue
//! and a worker task, so a slow or failing handler never blocks the publisher or
//! its siblings. Failures go to the bus's `DispatchObserver`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info};

use crate::model::LiveEvent;

pub mod dispatch;
pub mod observer;
pub mod ready;

pub use observer::{DispatchFailure, DispatchObserver, TracingObserver};
pub use ready::{signal_ready, wait_ready, ReadyWaiter};

use dispatch::Subscriber;

// ============================================================================
// Types
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Topic closed")]
    Closed,
}

/// Lifecycle signals exchanged between modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// A module finished starting up.
    Ready { module: String },
    /// A live channel started listening for a scope.
    Listening { scope_key: String },
    /// A live channel stopped listening for a scope.
    Stopped { scope_key: String },
}

/// Payload carried on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Live(LiveEvent),
    Lifecycle(Lifecycle),
    Json(serde_json::Value),
}

impl Message {
    pub fn as_live(&self) -> Option<&LiveEvent> {
        match self {
            Message::Live(event) => Some(event),
            _ => None,
        }
    }
}

impl From<LiveEvent> for Message {
    fn from(event: LiveEvent) -> Self {
        Message::Live(event)
    }
}

impl From<Lifecycle> for Message {
    fn from(signal: Lifecycle) -> Self {
        Message::Lifecycle(signal)
    }
}

impl From<serde_json::Value> for Message {
    fn from(value: serde_json::Value) -> Self {
        Message::Json(value)
    }
}

/// Handler for messages published on a topic.
pub trait TopicHandler: Send + Sync {
    /// Process one message.
    fn handle(&self, message: Arc<Message>) -> BoxFuture<'static, Result<()>>;
}

struct FnHandler<F>(F);

impl<F, Fut> TopicHandler for FnHandler<F>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, message: Arc<Message>) -> BoxFuture<'static, Result<()>> {
        Box::pin((self.0)(message))
    }
}

/// Wrap a closure as a topic handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TopicHandler>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Identifier of a subscription within its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle returned by `Topic::subscribe`, used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: String,
    id: SubscriptionId,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Topic bus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Queued deliveries per subscriber before new ones are dropped.
    pub subscriber_queue_capacity: usize,
    /// Upper bound on a single handler invocation, in milliseconds.
    pub handler_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 1024,
            handler_timeout_ms: 5000,
        }
    }
}

impl BusConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

// ============================================================================
// Topic
// ============================================================================

/// A named topic with an ordered list of subscribers.
pub struct Topic {
    name: String,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    config: BusConfig,
    observer: Arc<dyn DispatchObserver>,
}

impl Topic {
    fn new(name: String, config: BusConfig, observer: Arc<dyn DispatchObserver>) -> Self {
        Self {
            name,
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            config,
            observer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `handler` for every future publish until unsubscribed.
    ///
    /// Subscribing the same handler (same `Arc`) again returns the existing
    /// handle. Spawns the subscriber's worker, so it must be called within a
    /// Tokio runtime.
    pub fn subscribe(&self, handler: Arc<dyn TopicHandler>) -> SubscriptionHandle {
        let mut subscribers = self.subscribers.write();

        if let Some(existing) = subscribers.iter().find(|s| s.is_handler(&handler)) {
            debug!(
                topic = %self.name,
                subscription = existing.id().0,
                "Handler already subscribed"
            );
            return SubscriptionHandle {
                topic: self.name.clone(),
                id: existing.id(),
            };
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        subscribers.push(dispatch::spawn_subscriber(
            self.name.clone(),
            id,
            handler,
            &self.config,
            Arc::clone(&self.observer),
        ));

        debug!(
            topic = %self.name,
            subscription = id.0,
            subscriber_count = subscribers.len(),
            "Handler subscribed"
        );

        SubscriptionHandle {
            topic: self.name.clone(),
            id,
        }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        if handle.topic != self.name {
            return false;
        }

        let mut subscribers = self.subscribers.write();
        let Some(position) = subscribers.iter().position(|s| s.id() == handle.id) else {
            return false;
        };
        subscribers.remove(position);

        debug!(
            topic = %self.name,
            subscription = handle.id.0,
            subscriber_count = subscribers.len(),
            "Handler unsubscribed"
        );
        true
    }

    /// Queue `message` for every current subscriber, in registration order.
    ///
    /// Never waits on handlers. Returns the number of subscribers the message
    /// was queued for; zero subscribers is a silent no-op.
    pub fn publish(&self, message: impl Into<Message>) -> usize {
        let message = Arc::new(message.into());
        let subscribers = self.subscribers.read();
        let queued = dispatch::deliver(&self.name, &subscribers, &message, self.observer.as_ref());
        self.observer.published(&self.name, queued);
        queued
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

// ============================================================================
// Bus
// ============================================================================

/// Registry of topics keyed by name.
pub struct TopicBus {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    config: BusConfig,
    observer: Arc<dyn DispatchObserver>,
}

impl TopicBus {
    /// Create a bus that reports dispatch failures through `tracing`.
    pub fn new(config: BusConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    /// Create a bus with a custom observability sink.
    pub fn with_observer(config: BusConfig, observer: Arc<dyn DispatchObserver>) -> Self {
        info!(
            subscriber_queue_capacity = config.subscriber_queue_capacity,
            handler_timeout_ms = config.handler_timeout_ms,
            "Topic bus initialized"
        );

        Self {
            topics: RwLock::new(HashMap::new()),
            config,
            observer,
        }
    }

    /// Return the topic named `name`, creating it if absent.
    pub fn topic(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.read().get(name) {
            return Arc::clone(topic);
        }

        let mut topics = self.topics.write();
        Arc::clone(topics.entry(name.to_string()).or_insert_with(|| {
            debug!(topic = %name, "Topic created");
            Arc::new(Topic::new(
                name.to_string(),
                self.config.clone(),
                Arc::clone(&self.observer),
            ))
        }))
    }

    /// Publish on `name` without creating the topic if nobody ever looked it up.
    pub fn publish(&self, name: &str, message: impl Into<Message>) -> usize {
        let topic = self.topics.read().get(name).cloned();
        match topic {
            Some(topic) => topic.publish(message),
            None => {
                self.observer.published(name, 0);
                0
            }
        }
    }

    /// Names of all topics created so far.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}
