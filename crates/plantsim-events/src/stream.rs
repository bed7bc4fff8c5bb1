//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Plant signal types and the shared event stream."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::signal::Signal;

/// Identifier handed out to every subscriber of an [`EventStream`].
pub type SubscriptionId = u64;

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<Signal>,
}

#[derive(Debug, Default)]
struct StreamInner {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl StreamInner {
    fn remove(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }
}

/// Shared multicast channel fed by every plant worker.
///
/// Publishing holds the subscriber lock for the whole fan-out, so signals from one
/// producer reach every subscriber in the order they were published. Delivery goes
/// through unbounded queues and never blocks or fails the producer.
#[derive(Debug, Clone, Default)]
pub struct EventStream {
    inner: Arc<StreamInner>,
}

impl EventStream {
    /// Create a stream without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward a signal to every current subscriber.
    pub fn publish(&self, signal: Signal) {
        let mut subscribers = self.inner.subscribers.lock();
        if subscribers.is_empty() {
            trace!(plant_id = signal.plant_id(), kind = signal.kind(), "no subscribers for signal");
            return;
        }
        subscribers.retain(|subscriber| {
            let delivered = subscriber.tx.send(signal.clone()).is_ok();
            if !delivered {
                debug!(subscription = subscriber.id, "pruning closed subscriber");
            }
            delivered
        });
    }

    /// Accept a loosely typed payload from a foreign producer.
    ///
    /// Payloads that decode to a known [`Signal`] are forwarded; everything else is
    /// dropped with a diagnostic. Returns whether the payload was forwarded.
    pub fn publish_raw(&self, payload: &JsonValue) -> bool {
        match serde_json::from_value::<Signal>(payload.clone()) {
            Ok(signal) => {
                self.publish(signal);
                true
            }
            Err(err) => {
                let kind = payload
                    .get("type")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("<untagged>");
                warn!(kind, error = %err, "dropping unrecognized signal");
                false
            }
        }
    }

    /// Register a new subscriber. Only signals published afterwards are delivered.
    pub fn subscribe(&self) -> EventSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(Subscriber { id, tx });
        debug!(subscription = id, "event subscriber registered");
        EventSubscription {
            id,
            rx,
            stream: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Returns false when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove(id)
    }

    /// Number of subscribers currently registered.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

/// Failure modes of [`EventSubscription::wait_for`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    /// No matching signal arrived in time.
    #[error("no matching signal within {0:?}")]
    Timeout(Duration),
    /// The subscription was removed from its stream.
    #[error("event subscription closed")]
    Closed,
}

/// Receiving end of an [`EventStream`] subscription.
///
/// Dropping the subscription unregisters it from the stream.
#[derive(Debug)]
pub struct EventSubscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Signal>,
    stream: Weak<StreamInner>,
}

impl EventSubscription {
    /// Identifier of this subscription.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Await the next signal. `None` once the subscription has been removed.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }

    /// Take the next signal if one is already queued.
    pub fn try_recv(&mut self) -> Option<Signal> {
        self.rx.try_recv().ok()
    }

    /// Drain every signal that is already queued.
    pub fn drain(&mut self) -> Vec<Signal> {
        let mut signals = Vec::new();
        while let Some(signal) = self.try_recv() {
            signals.push(signal);
        }
        signals
    }

    /// Await the first signal matching `predicate`, discarding the others.
    pub async fn wait_for<F>(&mut self, mut predicate: F, timeout: Duration) -> Result<Signal, WaitError>
    where
        F: FnMut(&Signal) -> bool,
    {
        let search = async {
            while let Some(signal) = self.rx.recv().await {
                if predicate(&signal) {
                    return Ok(signal);
                }
            }
            Err(WaitError::Closed)
        };
        tokio::time::timeout(timeout, search)
            .await
            .unwrap_or(Err(WaitError::Timeout(timeout)))
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.stream.upgrade() {
            inner.remove(self.id);
        }
    }
}
