use std::sync::atomic::{AtomicU64, Ordering};

use omnichat_core::TenantId;
use omnichat_relay::{EventSink, RelayEvent};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

const BROADCAST_CAPACITY: usize = 256;

/// One serialized event and the tenant it belongs to.
#[derive(Debug, Clone)]
pub struct Frame {
    pub tenant: TenantId,
    pub payload: String,
}

/// Fan-out relay events to all connected WS clients via tokio broadcast channel.
pub struct EventBroadcaster {
    tx: broadcast::Sender<Frame>,
    seq: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    /// New client subscribes to the broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Monotonically increasing sequence for broadcast events.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBroadcaster {
    /// Silently drops if no subscribers exist.
    fn emit(&self, event: RelayEvent) {
        let tenant = event.tenant();
        let mut payload = match serde_json::to_value(&event) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to serialize relay event");
                return;
            }
        };
        payload["seq"] = json!(self.next_seq());
        let _ = self.tx.send(Frame {
            tenant,
            payload: payload.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnichat_core::ConversationId;

    #[tokio::test]
    async fn events_carry_tenant_and_sequence() {
        let b = EventBroadcaster::new();
        let mut rx = b.subscribe();
        for _ in 0..2 {
            b.emit(RelayEvent::HumanOverride {
                tenant_id: TenantId(4),
                conversation_id: ConversationId("c".into()),
                until: None,
            });
        }

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.tenant, TenantId(4));
        let v: serde_json::Value = serde_json::from_str(&second.payload).unwrap();
        assert_eq!(v["event"], "human_override");
        assert_eq!(v["seq"], 1);
    }

    #[test]
    fn emit_without_subscribers_is_a_no_op() {
        let b = EventBroadcaster::new();
        b.emit(RelayEvent::HumanOverride {
            tenant_id: TenantId(1),
            conversation_id: ConversationId("c".into()),
            until: None,
        });
        assert_eq!(b.client_count(), 0);
    }
}
