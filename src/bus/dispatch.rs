//! Per-subscriber delivery.
//!
//! Every subscription gets a bounded queue drained by its own worker task.
//! Delivery to one subscriber is FIFO; subscribers never wait on each other.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::observer::{DispatchFailure, DispatchObserver};
use super::{BusConfig, Message, SubscriptionId, TopicHandler};

/// A registered handler plus the sending half of its queue.
pub(crate) struct Subscriber {
    id: SubscriptionId,
    handler: Arc<dyn TopicHandler>,
    sender: mpsc::Sender<Arc<Message>>,
    active: Arc<AtomicBool>,
}

impl Subscriber {
    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn is_handler(&self, handler: &Arc<dyn TopicHandler>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.handler), Arc::as_ptr(handler))
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        // Queued messages are discarded once the subscription is gone.
        self.active.store(false, Ordering::Release);
    }
}

/// Create a subscriber and spawn its worker.
pub(crate) fn spawn_subscriber(
    topic: String,
    id: SubscriptionId,
    handler: Arc<dyn TopicHandler>,
    config: &BusConfig,
    observer: Arc<dyn DispatchObserver>,
) -> Subscriber {
    let (sender, mut receiver) = mpsc::channel::<Arc<Message>>(config.subscriber_queue_capacity.max(1));
    let active = Arc::new(AtomicBool::new(true));
    let timeout = config.handler_timeout();

    let worker_active = Arc::clone(&active);
    let worker_handler = Arc::clone(&handler);
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            if !worker_active.load(Ordering::Acquire) {
                break;
            }
            invoke(&topic, id, &worker_handler, message, timeout, observer.as_ref()).await;
        }
        debug!(topic = %topic, subscription = id.0, "Subscriber worker stopped");
    });

    Subscriber {
        id,
        handler,
        sender,
        active,
    }
}

/// Run one handler invocation with failure isolation.
///
/// Errors, panics and timeouts are reported to the observer and swallowed.
async fn invoke(
    topic: &str,
    id: SubscriptionId,
    handler: &Arc<dyn TopicHandler>,
    message: Arc<Message>,
    timeout: Duration,
    observer: &dyn DispatchObserver,
) {
    let handler = Arc::clone(handler);
    let call = AssertUnwindSafe(async move { handler.handle(message).await }).catch_unwind();

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => observer.report(topic, id, &DispatchFailure::Failed(e)),
        Ok(Err(panic)) => observer.report(
            topic,
            id,
            &DispatchFailure::Panicked(panic_message(panic.as_ref())),
        ),
        Err(_) => observer.report(topic, id, &DispatchFailure::TimedOut(timeout)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Queue a message for each subscriber without waiting.
///
/// Returns the number of subscribers the message was queued for.
pub(crate) fn deliver(
    topic: &str,
    subscribers: &[Subscriber],
    message: &Arc<Message>,
    observer: &dyn DispatchObserver,
) -> usize {
    let mut queued = 0;

    for subscriber in subscribers {
        match subscriber.sender.try_send(Arc::clone(message)) {
            Ok(()) => queued += 1,
            Err(TrySendError::Full(_)) => {
                observer.report(topic, subscriber.id, &DispatchFailure::QueueFull);
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    topic = %topic,
                    subscription = subscriber.id.0,
                    "Subscriber worker gone, skipping delivery"
                );
            }
        }
    }

    queued
}
