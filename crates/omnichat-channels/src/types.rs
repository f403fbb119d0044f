use omnichat_core::{MediaItem, MediaType, TenantId};
use serde::{Deserialize, Serialize};

/// What the provider told us about whoever sent the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Provider-specific sender kind (Chatwoot: `contact` or `user`).
    pub kind: Option<String>,
}

/// Provider-agnostic form of one inbound or echoed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Which adapter produced it (`chatwoot`, `ycloud`).
    pub provider: String,

    /// Logical channel the customer is on (`whatsapp`, `instagram`, `facebook`, `chatwoot`).
    pub original_channel: String,

    /// Customer identity within the channel. Never empty.
    pub external_user_id: String,

    pub display_name: Option<String>,

    pub tenant_id: TenantId,

    pub text_content: Option<String>,

    pub media: Vec<MediaItem>,

    /// Sent by a human operator or echoed back from our own outbound send.
    pub is_agent_originated: bool,

    pub provider_message_id: Option<String>,
    pub provider_conversation_id: Option<String>,
    pub provider_account_id: Option<String>,

    pub sender_info: SenderInfo,

    /// Untouched webhook body, kept as message platform metadata.
    pub raw_payload: serde_json::Value,
}

impl CanonicalMessage {
    pub fn has_image(&self) -> bool {
        self.media.iter().any(|m| m.media_type == MediaType::Image)
    }

    pub fn avatar_url(&self) -> Option<&str> {
        self.sender_info.avatar_url.as_deref()
    }

    /// Text to buffer for the agent. Media-only messages contribute their
    /// placeholder so the turn is not lost.
    pub fn buffer_text(&self) -> Option<String> {
        match self.text_content.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => Some(t.to_string()),
            _ => self.media.first().map(|m| m.media_type.placeholder()),
        }
    }
}
