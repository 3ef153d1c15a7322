//! Live channel bridge.
//!
//! Bridges one scoped push channel into the topic bus. While listening, every
//! `<entityType>:<kind>` push event for a configured entity type is decoded as
//! a `LiveEvent` and republished on the bus topic of the same name. Lifecycle
//! changes go out on [`LISTENING_TOPIC`] and [`STOPPED_TOPIC`].
//!
//! The bridge owns a [`ListenGate`]. Consumers that apply bridged events share
//! it and apply only through [`ListenGate::run_if_open`]. `stop_listen` closes
//! the gate before unregistering handlers, and closing waits for in-flight
//! applies, so nothing for the old scope is applied after it returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bus::{Lifecycle, Topic, TopicBus};
use crate::interfaces::push_channel::{ChannelError, ListenerId, PushChannel, PushHandler, PushTransport};
use crate::model::{topic_name, EventKind, LiveEvent};

/// Topic announcing that the bridge started listening.
pub const LISTENING_TOPIC: &str = "live:listening";

/// Topic announcing that the bridge stopped listening.
pub const STOPPED_TOPIC: &str = "live:stopped";

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors from bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The channel could not be opened. The bridge is not listening.
    #[error("Channel open failed: {0}")]
    ChannelOpen(#[from] ChannelError),
}

/// Bridge configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Entity types whose created/updated/deleted events are bridged.
    pub entity_types: Vec<String>,
}

impl BridgeConfig {
    pub fn with_entity_types<I, S>(entity_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_types: entity_types.into_iter().map(Into::into).collect(),
        }
    }
}

/// Current bridge state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeStatus {
    Idle,
    Listening { scope_key: String },
}

// ============================================================================
// Listen gate
// ============================================================================

/// Shared record of the scope currently accepting events.
#[derive(Debug, Clone, Default)]
pub struct ListenGate {
    scope: Arc<RwLock<Option<String>>>,
}

impl ListenGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_scope(&self) -> Option<String> {
        self.scope.read().clone()
    }

    pub fn is_open_for(&self, scope_key: &str) -> bool {
        self.scope.read().as_deref() == Some(scope_key)
    }

    /// Run `f` if the gate is open for `scope_key`.
    ///
    /// The gate cannot close while `f` runs. `f` must not block or await.
    pub fn run_if_open<T>(&self, scope_key: &str, f: impl FnOnce() -> T) -> Option<T> {
        let guard = self.scope.read();
        if guard.as_deref() == Some(scope_key) {
            Some(f())
        } else {
            None
        }
    }

    pub(crate) fn open(&self, scope_key: &str) {
        *self.scope.write() = Some(scope_key.to_string());
    }

    /// Close the gate, waiting for running `run_if_open` calls to finish.
    pub(crate) fn close(&self) {
        *self.scope.write() = None;
    }
}

// ============================================================================
// Bridge
// ============================================================================

struct ActiveListen {
    scope_key: String,
    channel: Arc<dyn PushChannel>,
    listeners: Vec<(String, ListenerId)>,
    live: Arc<AtomicBool>,
}

/// Bridges a scoped push channel into the topic bus.
pub struct LiveChannelBridge {
    transport: Arc<dyn PushTransport>,
    bus: Arc<TopicBus>,
    entity_types: Vec<String>,
    gate: ListenGate,
    active: Mutex<Option<ActiveListen>>,
}

impl LiveChannelBridge {
    pub fn new(transport: Arc<dyn PushTransport>, bus: Arc<TopicBus>, config: BridgeConfig) -> Self {
        Self {
            transport,
            bus,
            entity_types: config.entity_types,
            gate: ListenGate::new(),
            active: Mutex::new(None),
        }
    }

    /// Gate to share with consumers of bridged events.
    pub fn gate(&self) -> ListenGate {
        self.gate.clone()
    }

    pub async fn status(&self) -> BridgeStatus {
        match self.active.lock().await.as_ref() {
            Some(active) => BridgeStatus::Listening {
                scope_key: active.scope_key.clone(),
            },
            None => BridgeStatus::Idle,
        }
    }

    /// Start listening for `scope_key`.
    ///
    /// Listening again for the current scope is a no-op. Listening for a
    /// different scope stops the current one first; if the new channel then
    /// fails to open, the bridge is left idle.
    #[tracing::instrument(name = "bridge.start_listen", skip(self))]
    pub async fn start_listen(&self, scope_key: &str) -> Result<()> {
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            if current.scope_key == scope_key {
                debug!("Already listening, start ignored");
                return Ok(());
            }
        }
        if let Some(previous) = active.take() {
            info!(previous = %previous.scope_key, "Switching scope");
            self.shutdown(previous).await;
        }

        let channel = self.transport.open(scope_key).await.map_err(|e| {
            warn!(error = %e, "Failed to open push channel");
            BridgeError::ChannelOpen(e)
        })?;

        self.gate.open(scope_key);
        let live = Arc::new(AtomicBool::new(true));
        let mut listeners = Vec::with_capacity(self.entity_types.len() * EventKind::ALL.len());

        for entity_type in &self.entity_types {
            for kind in EventKind::ALL {
                let name = topic_name(entity_type, kind);
                let handler = republisher(
                    self.bus.topic(&name),
                    scope_key.to_string(),
                    Arc::clone(&live),
                );
                let id = channel.on(&name, handler);
                listeners.push((name, id));
            }
        }

        info!(listeners = listeners.len(), "Listening for live events");

        *active = Some(ActiveListen {
            scope_key: scope_key.to_string(),
            channel,
            listeners,
            live,
        });

        self.bus.topic(LISTENING_TOPIC).publish(Lifecycle::Listening {
            scope_key: scope_key.to_string(),
        });
        Ok(())
    }

    /// Stop listening. A no-op when idle.
    #[tracing::instrument(name = "bridge.stop_listen", skip(self))]
    pub async fn stop_listen(&self) {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(current) => self.shutdown(current).await,
            None => debug!("Not listening, stop ignored"),
        }
    }

    async fn shutdown(&self, current: ActiveListen) {
        self.gate.close();
        current.live.store(false, Ordering::SeqCst);

        for (name, id) in &current.listeners {
            current.channel.remove_listener(name, *id);
        }
        current.channel.close().await;

        info!(scope_key = %current.scope_key, "Stopped listening for live events");

        self.bus.topic(STOPPED_TOPIC).publish(Lifecycle::Stopped {
            scope_key: current.scope_key,
        });
    }
}

/// Push handler decoding payloads and republishing them on `topic`.
fn republisher(topic: Arc<Topic>, scope_key: String, live: Arc<AtomicBool>) -> PushHandler {
    Arc::new(move |payload| {
        if !live.load(Ordering::SeqCst) {
            return;
        }

        let event: LiveEvent = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(topic = %topic.name(), error = %e, "Undecodable push payload dropped");
                return;
            }
        };

        if event.scope_key != scope_key {
            debug!(
                topic = %topic.name(),
                scope_key = %event.scope_key,
                "Push event for another scope dropped"
            );
            return;
        }

        debug!(topic = %topic.name(), entity_id = %event.entity_id, "Bridging live event");
        topic.publish(event);
    })
}
