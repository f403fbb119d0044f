use omnichat_core::{ConversationId, MediaItem, Role, TenantId};
use serde::{Deserialize, Serialize};

/// One customer thread, unique per `(tenant_id, channel, external_user_id)`.
///
/// Timestamps are RFC 3339 strings as stored; parse with
/// [`omnichat_core::time::parse_utc`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_id: TenantId,
    pub channel: String,
    /// Which outbound sender serves this thread (`chatwoot`, `ycloud`).
    pub provider: String,
    pub external_user_id: String,
    pub display_name: Option<String>,
    pub provider_conversation_id: Option<String>,
    pub provider_account_id: Option<String>,
    pub status: String,
    pub human_override_until: Option<String>,
    pub last_message_at: Option<String>,
    pub last_message_preview: Option<String>,
    pub last_user_message_at: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Input to [`ConversationStore::resolve_or_create`](crate::ConversationStore::resolve_or_create).
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub tenant: TenantId,
    pub channel: String,
    pub provider: String,
    pub external_user_id: String,
    pub display_name: Option<String>,
    pub provider_conversation_id: Option<String>,
    pub provider_account_id: Option<String>,
    pub avatar_url: Option<String>,
}

impl ResolveRequest {
    pub fn new(
        tenant: TenantId,
        channel: impl Into<String>,
        provider: impl Into<String>,
        external_user_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant,
            channel: channel.into(),
            provider: provider.into(),
            external_user_id: external_user_id.into(),
            display_name: None,
            provider_conversation_id: None,
            provider_account_id: None,
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Resolved {
    Existing(Conversation),
    /// First event ever seen for this identity.
    Created(Conversation),
}

impl Resolved {
    pub fn conversation(&self) -> &Conversation {
        match self {
            Resolved::Existing(c) | Resolved::Created(c) => c,
        }
    }

    pub fn into_conversation(self) -> Conversation {
        match self {
            Resolved::Existing(c) | Resolved::Created(c) => c,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Resolved::Created(_))
    }
}

/// Filter for [`ConversationStore::list`](crate::ConversationStore::list).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationFilter {
    pub channel: Option<String>,
    /// Only threads whose human override is currently active.
    #[serde(default)]
    pub locked_only: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: ConversationId,
    pub tenant_id: TenantId,
    pub role: Role,
    pub content: String,
    pub attachments: Vec<MediaItem>,
    pub provider_message_id: Option<String>,
    pub platform_metadata: serde_json::Value,
    pub created_at: String,
}

/// Input to [`MessageStore::append`](crate::MessageStore::append).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub tenant: TenantId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    pub attachments: Vec<MediaItem>,
    pub provider_message_id: Option<String>,
    pub platform_metadata: serde_json::Value,
}

impl NewMessage {
    pub fn text(tenant: TenantId, conversation_id: ConversationId, role: Role, content: &str) -> Self {
        Self {
            tenant,
            conversation_id,
            role,
            content: content.to_string(),
            attachments: Vec::new(),
            provider_message_id: None,
            platform_metadata: serde_json::Value::Object(Default::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted(String),
    /// Already stored; carries the id of the existing row.
    Duplicate(String),
}

impl AppendOutcome {
    pub fn id(&self) -> &str {
        match self {
            AppendOutcome::Inserted(id) | AppendOutcome::Duplicate(id) => id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate(_))
    }
}
