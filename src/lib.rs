//! Braid - federated feed aggregation and live synchronization.
//!
//! Merges paginated result streams from independent providers into one
//! globally ordered feed, and keeps the materialized feed consistent with
//! create/update/delete events arriving over a real-time push channel.

pub mod aggregator;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod interfaces;
pub mod model;
pub mod reconciler;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use aggregator::{fetch_page, Continuation, FederatedAggregator, Page};
pub use bridge::LiveChannelBridge;
pub use bus::{Topic, TopicBus};
pub use model::{EventKind, ItemIdentity, LiveEvent, MaterializedItem};
pub use reconciler::{MaterializedFeed, Reconciler};
