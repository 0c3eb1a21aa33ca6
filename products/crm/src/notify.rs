//! Realtime fan-out to board subscribers.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const CARD_MOVED: &str = "card.moved";
pub const LEAD_CREATED: &str = "lead.created";
pub const LEAD_REASSIGNED: &str = "lead.reassigned";

pub fn pipeline_channel(pipeline_id: Uuid) -> String {
    format!("pipeline:{pipeline_id}")
}

/// Fire-and-forget publisher. Implementations must not block the caller.
pub trait Notifier: Send + Sync {
    fn publish(&self, channel: &str, event: &str, payload: Value);
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RealtimeEvent {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

/// In-process notifier backed by a tokio broadcast channel.
#[derive(Clone, Debug)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, channel: &str, event: &str, payload: Value) {
        let message = RealtimeEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        };
        if self.tx.send(message).is_err() {
            tracing::trace!(channel, event, "no realtime subscribers");
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn publish(&self, _channel: &str, _event: &str, _payload: Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let pipeline = Uuid::new_v4();
        notifier.publish(&pipeline_channel(pipeline), CARD_MOVED, json!({"rank": "V"}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, format!("pipeline:{pipeline}"));
        assert_eq!(event.event, "card.moved");
        assert_eq!(event.payload["rank"], "V");
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        BroadcastNotifier::new(1).publish("pipeline:x", LEAD_CREATED, Value::Null);
    }
}
