//! In-process pub/sub hub for real-time job event streaming.
//!
//! Rooms are keyed by string topics (`job:<job_id>` for per-job events,
//! `credits:<owner_id>` for balance updates) and backed by broadcast
//! channels, so delivery is best-effort and at-most-once per connection.
//! Subscribing is idempotent by construction: every (re)connect simply takes
//! a fresh receiver from the room's sender.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Topic carrying lifecycle and progress events for one job.
pub fn job_topic(job_id: Uuid) -> String {
    format!("job:{job_id}")
}

/// Topic carrying credit balance updates for one owner.
pub fn credits_topic(owner_id: Uuid) -> String {
    format!("credits:{owner_id}")
}

/// Topic-keyed broadcast hub.
///
/// Thread-safe, cloneable. Payloads are `serde_json::Value`; producers
/// serialize their own event types.
#[derive(Clone)]
pub struct StreamHub {
    rooms: Arc<RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>>,
    capacity: usize,
}

impl StreamHub {
    /// Create a new hub with default room capacity (256 buffered events).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Publish a JSON value to a topic. No-op if nobody is subscribed.
    pub async fn publish(&self, topic: &str, value: serde_json::Value) {
        let rooms = self.rooms.read().await;
        if let Some(tx) = rooms.get(topic) {
            // Ignore send errors (no active receivers)
            let _ = tx.send(value);
        }
    }

    /// Subscribe to a topic. Creates the room if it doesn't exist.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut rooms = self.rooms.write().await;
        let tx = rooms
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Number of live subscribers on a topic.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(topic).map_or(0, |tx| tx.receiver_count())
    }

    /// Remove rooms with zero subscribers (housekeeping).
    pub async fn cleanup(&self) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let hub = StreamHub::new();
        let job_id = Uuid::new_v4();
        let mut rx = hub.subscribe(&job_topic(job_id)).await;

        let value = serde_json::json!({"type": "started"});
        hub.publish(&job_topic(job_id), value.clone()).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received, value);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let hub = StreamHub::new();
        // Should not panic
        hub.publish("job:nobody", serde_json::json!({"type": "progress"}))
            .await;
    }

    #[tokio::test]
    async fn resubscribe_after_reconnect_is_idempotent() {
        let hub = StreamHub::new();
        let topic = job_topic(Uuid::new_v4());

        let rx1 = hub.subscribe(&topic).await;
        drop(rx1);
        let mut rx2 = hub.subscribe(&topic).await;

        hub.publish(&topic, serde_json::json!({"type": "cancelled"}))
            .await;
        assert!(rx2.recv().await.is_ok());
        assert_eq!(hub.subscriber_count(&topic).await, 1);
    }

    #[tokio::test]
    async fn cleanup_removes_empty_rooms() {
        let hub = StreamHub::new();
        let rx = hub.subscribe("job:ephemeral").await;

        assert_eq!(hub.rooms.read().await.len(), 1);

        drop(rx);
        hub.cleanup().await;

        assert_eq!(hub.rooms.read().await.len(), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let hub = StreamHub::new();
        let topic = job_topic(Uuid::new_v4());
        let mut rx1 = hub.subscribe(&topic).await;
        let mut rx2 = hub.subscribe(&topic).await;

        let value = serde_json::json!({"type": "completed"});
        hub.publish(&topic, value.clone()).await;

        assert_eq!(rx1.recv().await.unwrap(), value);
        assert_eq!(rx2.recv().await.unwrap(), value);
    }
}
