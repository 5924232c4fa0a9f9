//! Pub/sub transport contract and the in-process bus.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::CoreResult;
use crate::sync::version::ConfigurationVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMessageKind {
    /// A pushed configuration.
    ConfigUpdate,
    /// Ask peers (or one target) for their state.
    SyncRequest,
    /// Answer to a request, carrying the responder's configuration.
    SyncResponse,
    /// Liveness beacon.
    Heartbeat,
    /// Announcement on start.
    Discovery,
}

impl SyncMessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMessageKind::ConfigUpdate => "config-update",
            SyncMessageKind::SyncRequest => "sync-request",
            SyncMessageKind::SyncResponse => "sync-response",
            SyncMessageKind::Heartbeat => "heartbeat",
            SyncMessageKind::Discovery => "discovery",
        }
    }
}

/// Envelope exchanged between instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: SyncMessageKind,
    pub instance_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub version: Option<ConfigurationVersion>,
    /// Recipient instance for directed messages; `None` means everyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl SyncMessage {
    pub fn new(kind: SyncMessageKind, instance_id: &str, payload: Value) -> Self {
        Self {
            kind,
            instance_id: instance_id.to_string(),
            timestamp: Utc::now(),
            payload,
            version: None,
            target: None,
        }
    }

    pub fn with_version(mut self, version: ConfigurationVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Whether `instance_id` should act on this message.
    pub fn is_for(&self, instance_id: &str) -> bool {
        self.instance_id != instance_id && self.target.as_deref().map_or(true, |t| t == instance_id)
    }
}

pub type SubscriptionId = u64;

/// A live subscription. Dropping the receiver ends it lazily.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::UnboundedReceiver<SyncMessage>,
}

/// Channel-addressed message bus between instances.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    async fn publish(&self, channel: &str, message: SyncMessage) -> CoreResult<()>;
    async fn subscribe(&self, channel: &str) -> CoreResult<Subscription>;
    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> CoreResult<()>;
}

/// Bus connecting coordinators living in the same process.
///
/// Every subscriber of a channel receives every message published on it,
/// including its own; coordinators filter by instance id.
#[derive(Debug, Default)]
pub struct InProcessBus {
    channels: DashMap<String, Vec<(SubscriptionId, mpsc::UnboundedSender<SyncMessage>)>>,
    next_id: AtomicU64,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |subs| subs.len())
    }
}

#[async_trait]
impl PubSubTransport for InProcessBus {
    async fn publish(&self, channel: &str, message: SyncMessage) -> CoreResult<()> {
        if let Some(mut subscribers) = self.channels.get_mut(channel) {
            subscribers.retain(|(_, tx)| tx.send(message.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CoreResult<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, receiver) = mpsc::unbounded_channel();
        self.channels.entry(channel.to_string()).or_default().push((id, tx));
        Ok(Subscription { id, receiver })
    }

    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> CoreResult<()> {
        if let Some(mut subscribers) = self.channels.get_mut(channel) {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = InProcessBus::new();
        let mut a = bus.subscribe("cfg").await.unwrap();
        let mut b = bus.subscribe("cfg").await.unwrap();
        let mut other = bus.subscribe("elsewhere").await.unwrap();

        bus.publish("cfg", SyncMessage::new(SyncMessageKind::Heartbeat, "i1", json!({})))
            .await
            .unwrap();

        assert_eq!(a.receiver.recv().await.unwrap().instance_id, "i1");
        assert_eq!(b.receiver.recv().await.unwrap().kind, SyncMessageKind::Heartbeat);
        assert!(other.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_and_dropped_receivers() {
        let bus = InProcessBus::new();
        let a = bus.subscribe("cfg").await.unwrap();
        let b = bus.subscribe("cfg").await.unwrap();
        bus.unsubscribe("cfg", a.id).await.unwrap();
        assert_eq!(bus.subscriber_count("cfg"), 1);

        drop(b);
        bus.publish("cfg", SyncMessage::new(SyncMessageKind::Heartbeat, "i1", json!({})))
            .await
            .unwrap();
        assert_eq!(bus.subscriber_count("cfg"), 0);
    }

    #[test]
    fn test_message_targeting() {
        let broadcast = SyncMessage::new(SyncMessageKind::SyncRequest, "a", Value::Null);
        assert!(broadcast.is_for("b"));
        assert!(!broadcast.is_for("a"));

        let directed = broadcast.clone().to("c");
        assert!(!directed.is_for("b"));
        assert!(directed.is_for("c"));
    }

    #[test]
    fn test_wire_shape() {
        let msg = SyncMessage::new(SyncMessageKind::ConfigUpdate, "a", json!({"k": 1}));
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["type"], "config-update");
        assert_eq!(wire["instanceId"], "a");
        assert!(wire.get("target").is_none());
    }
}
