//! Live update fan-out to connected observers.
//!
//! Observers register a bounded sender keyed by an opaque connection id.
//! Delivery is best-effort and lossy: a send that fails, for a dead or
//! lagging observer alike, evicts that observer on the spot. Nothing here
//! ever waits on a slow peer.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

/// Per-observer send queue depth before it counts as lagging.
pub const OBSERVER_BUFFER: usize = 32;

#[derive(Serialize)]
struct UpdateEnvelope<'a, T> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "targetId")]
    target_id: i64,
    data: &'a T,
}

/// Registry of connected observers.
#[derive(Default)]
pub struct LiveChannel {
    observers: RwLock<HashMap<String, mpsc::Sender<String>>>,
}

impl LiveChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer under a connection id.
    ///
    /// At most one live observer per id: an existing sender under the
    /// same id is dropped, which closes the previous connection's queue
    /// and shuts it down.
    pub async fn register(&self, id: impl Into<String>, sender: mpsc::Sender<String>) {
        let id = id.into();
        let mut observers = self.observers.write().await;
        if observers.insert(id.clone(), sender).is_some() {
            tracing::info!(observer = %id, "replacing existing observer connection");
        }
        tracing::debug!(observer = %id, total = observers.len(), "observer connected");
    }

    /// Remove an observer, but only if `sender` is still the registered
    /// one; a connection replaced by a newer one must not evict its
    /// successor on the way out.
    pub async fn unregister(&self, id: &str, sender: &mpsc::Sender<String>) {
        let mut observers = self.observers.write().await;
        if observers
            .get(id)
            .is_some_and(|current| current.same_channel(sender))
        {
            observers.remove(id);
            tracing::debug!(observer = %id, total = observers.len(), "observer disconnected");
        }
    }

    /// Number of currently registered observers.
    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// Broadcast one target update to every observer.
    pub async fn broadcast<T: Serialize>(&self, target_id: i64, data: &T) {
        let envelope = UpdateEnvelope {
            kind: "siteUpdate",
            target_id,
            data,
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(target_id, error = %e, "failed to serialize update");
                return;
            }
        };

        let mut dead = Vec::new();
        {
            let observers = self.observers.read().await;
            for (id, sender) in observers.iter() {
                if sender.try_send(payload.clone()).is_err() {
                    dead.push(id.clone());
                }
            }
        }

        if !dead.is_empty() {
            let mut observers = self.observers.write().await;
            for id in dead {
                if observers.remove(&id).is_some() {
                    tracing::info!(observer = %id, "evicted unresponsive observer");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn test_broadcast_reaches_observer() {
        let channel = LiveChannel::new();
        let (tx, mut rx) = mpsc::channel(OBSERVER_BUFFER);
        channel.register("client-a", tx).await;

        channel.broadcast(42, &serde_json::json!({"status": "up"})).await;

        let payload = rx.recv().await.unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["type"], "siteUpdate");
        assert_eq!(value["targetId"], 42);
        assert_eq!(value["data"]["status"], "up");
    }

    #[tokio::test]
    async fn test_same_id_closes_previous_connection() {
        let channel = LiveChannel::new();
        let (tx1, mut rx1) = mpsc::channel(OBSERVER_BUFFER);
        let (tx2, mut rx2) = mpsc::channel(OBSERVER_BUFFER);

        channel.register("client", tx1).await;
        channel.register("client", tx2).await;

        // The first sender was dropped by the replacement, so its queue
        // reports closed
        assert!(rx1.recv().await.is_none());
        assert_eq!(channel.observer_count().await, 1);

        channel.broadcast(1, &serde_json::json!({})).await;
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_dead_observer_is_evicted() {
        let channel = LiveChannel::new();
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        channel.register("dead", tx).await;
        drop(rx);

        channel.broadcast(1, &serde_json::json!({})).await;
        assert_eq!(channel.observer_count().await, 0);
    }

    #[tokio::test]
    async fn test_lagging_observer_is_evicted() {
        let channel = LiveChannel::new();
        let (tx, _rx) = mpsc::channel(1);
        channel.register("laggard", tx).await;

        // First update fills the queue, second finds it full
        channel.broadcast(1, &serde_json::json!({})).await;
        channel.broadcast(2, &serde_json::json!({})).await;
        assert_eq!(channel.observer_count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_ignores_replaced_sender() {
        let channel = LiveChannel::new();
        let (tx1, _rx1) = mpsc::channel(OBSERVER_BUFFER);
        let (tx2, _rx2) = mpsc::channel(OBSERVER_BUFFER);

        channel.register("client", tx1.clone()).await;
        channel.register("client", tx2).await;

        // The replaced connection's teardown must not evict its successor
        channel.unregister("client", &tx1).await;
        assert_eq!(channel.observer_count().await, 1);
    }
}
