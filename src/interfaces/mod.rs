//! Abstract interfaces for braid components.
//!
//! These traits define the contracts for:
//! - Providers (paginated data sources)
//! - Item order (injected total order over feed items)
//! - Push channels (transport-specific real-time clients)

pub mod order;
pub mod provider;
pub mod push_channel;

pub use order::{ItemOrder, NewestFirst, OldestFirst};
pub use provider::{Cursor, FetchPage, Provider, ProviderError};
pub use push_channel::{ChannelError, ListenerId, PushChannel, PushHandler, PushTransport};
