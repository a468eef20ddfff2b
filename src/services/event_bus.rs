//! Production `EventBus` over the eight named topics (spec.md §6).
//!
//! Grounded on the teacher's `EventBus`: a `tokio::sync::broadcast`
//! channel per process, a monotonic sequence counter, and a
//! subscribe-from-anywhere API. The teacher's single giant
//! `UnifiedEvent`/`EventPayload` enum doesn't carry over — each
//! Sympozium topic publishes its own already-serialized JSON body, so
//! the bus itself stays payload-agnostic and new event shapes never
//! require touching this file.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::errors::SympoziumError;
use crate::domain::ports::{EventBus as EventBusPort, Topic};

/// An envelope broadcast to subscribers: the topic, an assigned sequence
/// number, and the caller-supplied JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sequence: u64,
    pub topic: &'static str,
    pub timestamp: DateTime<Utc>,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct BroadcastEventBusConfig {
    pub channel_capacity: usize,
}

impl Default for BroadcastEventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Broadcast-channel-backed event bus. One instance is shared (via
/// `Arc`) across every reconciler and the webhook server; each holds a
/// clone of the `Arc` and calls `subscribe()` independently.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Envelope>,
    sequence: AtomicU64,
}

impl BroadcastEventBus {
    pub fn new(config: BroadcastEventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(BroadcastEventBusConfig::default())
    }
}

#[async_trait]
impl EventBusPort for BroadcastEventBus {
    async fn publish(&self, topic: Topic, body: serde_json::Value) -> Result<(), SympoziumError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope {
            sequence,
            topic: topic.as_str(),
            timestamp: Utc::now(),
            body,
        };
        // A send with no subscribers is not an error: reconcilers may
        // start publishing before the channel router has subscribed.
        let _ = self.sender.send(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_assigns_increasing_sequence_numbers() {
        let bus = BroadcastEventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(Topic::AgentRunRequested, serde_json::json!({"a": 1}))
            .await
            .unwrap();
        bus.publish(Topic::AgentRunStarted, serde_json::json!({"a": 2}))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(first.topic, "agent.run.requested");
        assert_eq!(second.topic, "agent.run.started");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = BroadcastEventBus::default();
        assert!(bus
            .publish(Topic::ScheduleUpsert, serde_json::json!({}))
            .await
            .is_ok());
    }
}
