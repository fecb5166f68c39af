//! Publish/subscribe hub for live run-state snapshots.
//!
//! The broker fans serialized snapshots out to every currently registered
//! observer. It knows nothing about test semantics: messages are opaque
//! strings.
//!
//! Each subscriber owns a bounded channel of capacity 1. A publish hands the
//! message to every subscriber concurrently, so a slow consumer applies
//! backpressure to its own handoff only while the other subscribers receive
//! the message independently. There is no history: a subscriber registered
//! after a publish never sees that message.
//!
//! The broker is an explicitly constructed value owned by the composition
//! root and cloned into each session; the subscriber set is the only state
//! shared across concurrent sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::mpsc;

/// Per-subscriber channel capacity. One slot: the publisher waits for the
/// previous message to be consumed before handing over the next.
const SUBSCRIBER_CAPACITY: usize = 1;

#[derive(Default)]
struct BrokerInner {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
}

/// Fan-out hub distributing messages to all live subscribers.
#[derive(Clone, Default)]
pub struct ResultBroker {
    inner: Arc<BrokerInner>,
}

impl ResultBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` to every current subscriber, waiting for each
    /// capacity-1 handoff concurrently. Subscribers that disappeared since
    /// registration are skipped.
    pub async fn publish(&self, message: String) {
        let senders: Vec<mpsc::Sender<String>> = {
            // Snapshot under the lock; never hold it across an await.
            let subscribers = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subscribers.values().cloned().collect()
        };
        join_all(
            senders
                .iter()
                .map(|sender| sender.send(message.clone())),
        )
        .await;
    }

    /// Register a new subscriber. The subscription yields messages until it
    /// is dropped, at which point the channel is deregistered.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        Subscription {
            id,
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// A live subscription to the broker. Deregisters itself on drop; the
/// message sequence is not restartable.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<String>,
    inner: Arc<BrokerInner>,
}

impl Subscription {
    /// Next published message. `None` only if the broker itself is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}
