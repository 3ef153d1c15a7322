//! Push channel interface.
//!
//! Abstracts a transport-specific real-time client with per-scope channels
//! and `on` / `remove_listener` semantics.

use std::sync::Arc;

use async_trait::async_trait;

/// Result type for push channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors from push channel operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to open channel for scope '{scope_key}': {message}")]
    Open { scope_key: String, message: String },
}

/// Callback invoked with the raw payload of a push event.
pub type PushHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Registration handle returned by `PushChannel::on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// An open channel for one scope (room, tenant, user).
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Scope this channel was opened for.
    fn scope_key(&self) -> &str;

    /// Register `handler` for events named `event_type`.
    fn on(&self, event_type: &str, handler: PushHandler) -> ListenerId;

    /// Remove a previously registered handler. Unknown ids are ignored.
    fn remove_listener(&self, event_type: &str, id: ListenerId);

    /// Close the channel. No handler is invoked after this returns.
    async fn close(&self);
}

/// Factory for per-scope push channels.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, scope_key: &str) -> Result<Arc<dyn PushChannel>>;
}
