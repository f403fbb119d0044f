use omnichat_core::{ConversationId, MediaItem, Role, TenantId};
use serde::Serialize;

/// Real-time notifications produced by the relay for operator consoles.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    NewMessage {
        tenant_id: TenantId,
        conversation_id: ConversationId,
        message_id: String,
        role: Role,
        content: String,
        attachments: Vec<MediaItem>,
        channel: String,
        external_user_id: String,
        display_name: Option<String>,
    },
    HumanOverride {
        tenant_id: TenantId,
        conversation_id: ConversationId,
        until: Option<String>,
    },
}

impl RelayEvent {
    pub fn tenant(&self) -> TenantId {
        match self {
            RelayEvent::NewMessage { tenant_id, .. } | RelayEvent::HumanOverride { tenant_id, .. } => {
                *tenant_id
            }
        }
    }
}

/// Where relay events are pushed. Must not block; delivery is best effort.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RelayEvent);
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RelayEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let ev = RelayEvent::HumanOverride {
            tenant_id: TenantId(3),
            conversation_id: ConversationId("c1".into()),
            until: None,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "human_override");
        assert_eq!(json["tenant_id"], 3);
        assert_eq!(ev.tenant(), TenantId(3));
    }
}
