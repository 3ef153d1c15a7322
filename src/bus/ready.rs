//! Module readiness signals.
//!
//! A consumer that must not configure itself before a producer is up calls
//! `wait_ready` and awaits the returned waiter; the producer calls
//! `signal_ready` once it is up. The waiter subscribes when it is created, so
//! only signals published after `wait_ready` returns are observed.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::{handler_fn, BusError, Lifecycle, Result, SubscriptionHandle, Topic, TopicBus};

/// Topic carrying readiness for `module`.
pub fn ready_topic(module: &str) -> String {
    format!("ready:{}", module)
}

/// Announce that `module` is ready. Returns the number of waiters notified.
pub fn signal_ready(bus: &TopicBus, module: &str) -> usize {
    let queued = bus.topic(&ready_topic(module)).publish(Lifecycle::Ready {
        module: module.to_string(),
    });
    info!(module = %module, waiters = queued, "Module ready");
    queued
}

/// Start waiting for `module` to signal readiness.
///
/// Must be called within a Tokio runtime.
pub fn wait_ready(bus: &TopicBus, module: &str) -> ReadyWaiter {
    let (sender, receiver) = oneshot::channel();
    let sender = Mutex::new(Some(sender));

    let topic = bus.topic(&ready_topic(module));
    let handle = topic.subscribe(handler_fn(move |_message| {
        if let Some(sender) = sender.lock().take() {
            let _ = sender.send(());
        }
        std::future::ready(Ok(()))
    }));

    debug!(module = %module, "Waiting for module readiness");

    ReadyWaiter {
        topic,
        handle,
        receiver,
    }
}

/// Pending readiness wait. Unsubscribes when dropped.
pub struct ReadyWaiter {
    topic: Arc<Topic>,
    handle: SubscriptionHandle,
    receiver: oneshot::Receiver<()>,
}

impl ReadyWaiter {
    /// Wait until the module signals readiness.
    pub async fn wait(mut self) -> Result<()> {
        (&mut self.receiver).await.map_err(|_| BusError::Closed)
    }

    /// Wait at most `timeout`. Returns `Ok(false)` on timeout.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<bool> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => Ok(false),
        }
    }
}

impl Drop for ReadyWaiter {
    fn drop(&mut self) {
        self.topic.unsubscribe(&self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_then_signal() {
        let bus = TopicBus::default();
        let waiter = wait_ready(&bus, "search");

        assert_eq!(signal_ready(&bus, "search"), 1);
        assert!(waiter.wait_timeout(Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_signal_before_wait_is_not_replayed() {
        let bus = TopicBus::default();
        assert_eq!(signal_ready(&bus, "search"), 0);

        let waiter = wait_ready(&bus, "search");
        assert!(!waiter
            .wait_timeout(Duration::from_millis(50))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_waiter_unsubscribes_on_drop() {
        let bus = TopicBus::default();
        let waiter = wait_ready(&bus, "members");
        let topic = bus.topic(&ready_topic("members"));
        assert_eq!(topic.subscriber_count(), 1);

        drop(waiter);
        assert_eq!(topic.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_other_module_signal_ignored() {
        let bus = TopicBus::default();
        let waiter = wait_ready(&bus, "members");
        signal_ready(&bus, "search");

        assert!(!waiter
            .wait_timeout(Duration::from_millis(50))
            .await
            .unwrap());
    }
}
