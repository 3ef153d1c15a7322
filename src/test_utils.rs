//! Test utilities and mock implementations.
//!
//! In-memory providers, a scriptable push transport and recording bus
//! handlers for testing without real data sources or sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::bus::{
    BusError, DispatchFailure, DispatchObserver, Message, SubscriptionId, TopicHandler,
};
use crate::interfaces::provider::{Cursor, FetchPage, Provider, ProviderError, Result as ProviderResult};
use crate::interfaces::push_channel::{
    ChannelError, ListenerId, PushChannel, PushHandler, PushTransport, Result as ChannelResult,
};
use crate::model::{EventKind, ItemIdentity, LiveEvent, MaterializedItem};

// ============================================================================
// Items and events
// ============================================================================

/// Timestamp `secs` seconds after the epoch.
pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

/// Item with the given identity and timestamp, payload `{"t": secs}`.
pub fn item_at(object_type: &str, id: &str, secs: i64) -> MaterializedItem {
    MaterializedItem::new(
        ItemIdentity::new(object_type, id),
        ts(secs),
        serde_json::json!({ "t": secs }),
    )
}

/// Items `object_type/<secs>` for each timestamp, in the given order.
pub fn items(object_type: &str, timestamps: &[i64]) -> Vec<MaterializedItem> {
    timestamps
        .iter()
        .map(|t| item_at(object_type, &t.to_string(), *t))
        .collect()
}

/// Live event whose body carries an RFC 3339 `updatedAt`.
pub fn live_event(kind: EventKind, entity_type: &str, id: &str, scope_key: &str, secs: i64) -> LiveEvent {
    LiveEvent {
        event_type: kind.as_str().to_string(),
        entity_id: id.to_string(),
        entity_type: entity_type.to_string(),
        scope_key: scope_key.to_string(),
        body: serde_json::json!({ "updatedAt": ts(secs).to_rfc3339(), "t": secs }),
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// Providers
// ============================================================================

/// Offset-paginated provider over a fixed, pre-ordered item list.
///
/// Failures and short pages are scriptable.
pub struct VecProvider {
    name: String,
    items: Vec<MaterializedItem>,
    fail_next: AtomicUsize,
    permanent: AtomicBool,
    max_per_fetch: Option<usize>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl VecProvider {
    pub fn new(name: &str, items: Vec<MaterializedItem>) -> Self {
        Self {
            name: name.to_string(),
            items,
            fail_next: AtomicUsize::new(0),
            permanent: AtomicBool::new(false),
            max_per_fetch: None,
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Return at most `max` items per fetch regardless of page size.
    pub fn with_short_pages(mut self, max: usize) -> Self {
        self.max_per_fetch = Some(max);
        self
    }

    /// Sleep before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `count` fetches with a transient error.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every fetch from now on with a permanent error.
    pub fn fail_permanently(&self) {
        self.permanent.store(true, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for VecProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, cursor: Option<&Cursor>, page_size: usize) -> ProviderResult<FetchPage> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.permanent.load(Ordering::SeqCst) {
            return Err(ProviderError::Permanent(format!("{} is gone", self.name)));
        }
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(ProviderError::Fetch(format!("{} unavailable", self.name)));
        }

        let start = cursor.and_then(Cursor::as_offset).unwrap_or(0).min(self.items.len());
        let take = self.max_per_fetch.map_or(page_size, |max| max.min(page_size));
        let end = (start + take).min(self.items.len());
        let page = self.items[start..end].to_vec();

        if end < self.items.len() {
            Ok(FetchPage::more(page, Cursor::from_offset(end)))
        } else {
            Ok(FetchPage::last(page))
        }
    }
}

// ============================================================================
// Bus handlers and observers
// ============================================================================

/// Handler that counts invocations.
#[derive(Default)]
pub struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.count)
    }
}

impl TopicHandler for CountingHandler {
    fn handle(&self, _message: Arc<Message>) -> BoxFuture<'static, Result<(), BusError>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Handler that records every message it receives.
#[derive(Default)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<Arc<Message>>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Arc<Mutex<Vec<Arc<Message>>>> {
        Arc::clone(&self.received)
    }
}

impl TopicHandler for RecordingHandler {
    fn handle(&self, message: Arc<Message>) -> BoxFuture<'static, Result<(), BusError>> {
        self.received.lock().push(message);
        Box::pin(async { Ok(()) })
    }
}

/// Handler that always fails.
pub struct FailingHandler;

impl TopicHandler for FailingHandler {
    fn handle(&self, _message: Arc<Message>) -> BoxFuture<'static, Result<(), BusError>> {
        Box::pin(async { Err(BusError::Handler("intentional failure".to_string())) })
    }
}

/// Handler that panics.
pub struct PanickingHandler;

impl TopicHandler for PanickingHandler {
    fn handle(&self, _message: Arc<Message>) -> BoxFuture<'static, Result<(), BusError>> {
        Box::pin(async {
            if true {
                panic!("intentional panic");
            }
            Ok(())
        })
    }
}

/// Handler that never completes.
pub struct StalledHandler;

impl TopicHandler for StalledHandler {
    fn handle(&self, _message: Arc<Message>) -> BoxFuture<'static, Result<(), BusError>> {
        Box::pin(futures::future::pending())
    }
}

/// Observer that records failures as `(topic, kind)` pairs.
#[derive(Default)]
pub struct RecordingObserver {
    failures: Mutex<Vec<(String, &'static str)>>,
    publishes: AtomicUsize,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<(String, &'static str)> {
        self.failures.lock().clone()
    }

    pub fn failure_count(&self, kind: &str) -> usize {
        self.failures.lock().iter().filter(|(_, k)| *k == kind).count()
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

impl DispatchObserver for RecordingObserver {
    fn published(&self, _topic: &str, _queued: usize) {
        self.publishes.fetch_add(1, Ordering::SeqCst);
    }

    fn report(&self, topic: &str, _subscription: SubscriptionId, failure: &DispatchFailure) {
        self.failures.lock().push((topic.to_string(), failure.kind()));
    }
}

// ============================================================================
// Push transport
// ============================================================================

/// In-memory push channel whose events are emitted by the test.
pub struct MockPushChannel {
    scope_key: String,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, PushHandler)>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl MockPushChannel {
    fn new(scope_key: &str) -> Self {
        Self {
            scope_key: scope_key.to_string(),
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Deliver `payload` to handlers registered for `event_type`.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event_type: &str, payload: serde_json::Value) -> usize {
        if self.is_closed() {
            return 0;
        }
        let handlers: Vec<PushHandler> = self
            .listeners
            .lock()
            .get(event_type)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in &handlers {
            handler(payload.clone());
        }
        handlers.len()
    }

    /// Serialize `event` and emit it under `<entityType>:<eventType>`.
    pub fn emit_event(&self, event: &LiveEvent) -> usize {
        let name = format!("{}:{}", event.entity_type, event.event_type);
        let payload = serde_json::to_value(event).unwrap_or_default();
        self.emit(&name, payload)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().values().map(Vec::len).sum()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushChannel for MockPushChannel {
    fn scope_key(&self) -> &str {
        &self.scope_key
    }

    fn on(&self, event_type: &str, handler: PushHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .entry(event_type.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn remove_listener(&self, event_type: &str, id: ListenerId) {
        if let Some(list) = self.listeners.lock().get_mut(event_type) {
            list.retain(|(existing, _)| *existing != id);
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Transport handing out `MockPushChannel`s, optionally refusing to open.
#[derive(Default)]
pub struct MockPushTransport {
    channels: Mutex<HashMap<String, Arc<MockPushChannel>>>,
    opens: AtomicUsize,
    fail_open: AtomicBool,
}

impl MockPushTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Most recently opened channel for `scope_key`.
    pub fn channel(&self, scope_key: &str) -> Option<Arc<MockPushChannel>> {
        self.channels.lock().get(scope_key).cloned()
    }

    /// Send `event` the way a push server would: to the channel open for its
    /// scope, if any. Returns the number of handlers invoked.
    pub fn emit_event(&self, event: &LiveEvent) -> usize {
        self.channel(&event.scope_key)
            .map_or(0, |channel| channel.emit_event(event))
    }

    /// Channels opened and not yet closed.
    pub fn open_channel_count(&self) -> usize {
        self.channels
            .lock()
            .values()
            .filter(|channel| !channel.is_closed())
            .count()
    }
}

#[async_trait]
impl PushTransport for MockPushTransport {
    async fn open(&self, scope_key: &str) -> ChannelResult<Arc<dyn PushChannel>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ChannelError::Open {
                scope_key: scope_key.to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let channel = Arc::new(MockPushChannel::new(scope_key));
        self.channels
            .lock()
            .insert(scope_key.to_string(), Arc::clone(&channel));
        Ok(channel)
    }
}
