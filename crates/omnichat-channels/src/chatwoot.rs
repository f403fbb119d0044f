use omnichat_core::{MediaItem, TenantId};
use serde_json::Value;
use tracing::debug;

use crate::{
    adapter::{id_field, str_field, ChannelAdapter},
    error::{ChannelError, Result},
    media,
    types::{CanonicalMessage, SenderInfo},
};

pub const PROVIDER: &str = "chatwoot";

/// Chatwoot `message_created` webhooks (WhatsApp, Instagram, Facebook and
/// website inboxes all arrive through here).
#[derive(Debug, Default)]
pub struct ChatwootAdapter;

#[derive(Debug, PartialEq, Eq)]
enum MessageKind {
    Incoming,
    Outgoing,
    Activity,
    Template,
}

impl MessageKind {
    /// Chatwoot sends either the enum name or its integer value.
    fn from_value(v: Option<&Value>) -> Self {
        match v {
            Some(Value::Number(n)) => match n.as_i64() {
                Some(1) => Self::Outgoing,
                Some(2) => Self::Activity,
                Some(3) => Self::Template,
                _ => Self::Incoming,
            },
            Some(Value::String(s)) => match s.as_str() {
                "outgoing" => Self::Outgoing,
                "activity" => Self::Activity,
                "template" => Self::Template,
                _ => Self::Incoming,
            },
            _ => Self::Incoming,
        }
    }
}

impl ChannelAdapter for ChatwootAdapter {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn normalize(&self, payload: &Value, tenant: TenantId) -> Result<Vec<CanonicalMessage>> {
        if payload.get("event").and_then(Value::as_str) != Some("message_created") {
            debug!(tenant = %tenant, "chatwoot: ignoring non message_created event");
            return Ok(Vec::new());
        }
        if payload.get("private").and_then(Value::as_bool).unwrap_or(false) {
            debug!(tenant = %tenant, "chatwoot: ignoring private note");
            return Ok(Vec::new());
        }

        let kind = MessageKind::from_value(payload.get("message_type"));
        if kind == MessageKind::Activity {
            return Ok(Vec::new());
        }
        let is_agent = matches!(kind, MessageKind::Outgoing | MessageKind::Template);

        let conversation = payload.get("conversation").unwrap_or(&Value::Null);
        let channel = resolve_channel(str_field(conversation, "channel").as_deref());

        let text = str_field(payload, "content").filter(|c| !c.trim().is_empty());
        let media = extract_media(payload);
        if text.is_none() && media.is_empty() {
            return Ok(Vec::new());
        }

        let sender = payload.get("sender").unwrap_or(&Value::Null);
        let contact = conversation
            .get("meta")
            .and_then(|m| m.get("sender"))
            .unwrap_or(&Value::Null);

        // The thread's contact identifies the customer in both directions;
        // on outgoing messages `sender` is the operator.
        let customer = if contact.is_object() {
            contact
        } else if !is_agent {
            sender
        } else {
            &Value::Null
        };

        let mut info = sender_info(customer);
        if !is_agent {
            let own = sender_info(sender);
            let own_name_is_id = own.name.is_some() && own.name == own.id;
            if own.name.is_some() && !own_name_is_id {
                info.name = own.name;
            }
            if own.avatar_url.is_some() {
                info.avatar_url = own.avatar_url;
            }
        }
        // Contact meta uses `thumbnail` for the avatar.
        if info.avatar_url.is_none() {
            info.avatar_url = str_field(contact, "thumbnail");
        }

        let external_user_id = match (channel.as_str(), info.phone.as_deref()) {
            ("whatsapp", Some(phone)) => phone.to_string(),
            _ => info.id.clone().unwrap_or_default(),
        };
        if external_user_id.is_empty() {
            return Err(ChannelError::InvalidPayload(
                "chatwoot message without a resolvable contact".to_string(),
            ));
        }

        let msg = CanonicalMessage {
            provider: PROVIDER.to_string(),
            original_channel: channel,
            external_user_id,
            display_name: info.name.clone(),
            tenant_id: tenant,
            text_content: text,
            media,
            is_agent_originated: is_agent,
            provider_message_id: id_field(payload, "id"),
            provider_conversation_id: id_field(conversation, "id"),
            provider_account_id: payload.get("account").and_then(|a| id_field(a, "id")),
            sender_info: info,
            raw_payload: payload.clone(),
        };

        debug!(
            tenant = %tenant,
            channel = %msg.original_channel,
            media = msg.media.len(),
            agent = msg.is_agent_originated,
            "chatwoot: normalized message"
        );
        Ok(vec![msg])
    }
}

fn resolve_channel(cw_channel: Option<&str>) -> String {
    let c = cw_channel.unwrap_or_default().to_ascii_lowercase();
    if c.contains("whatsapp") {
        "whatsapp"
    } else if c.contains("instagram") {
        "instagram"
    } else if c.contains("facebook") {
        "facebook"
    } else {
        PROVIDER
    }
    .to_string()
}

fn sender_info(v: &Value) -> SenderInfo {
    SenderInfo {
        id: id_field(v, "id"),
        name: str_field(v, "name"),
        avatar_url: str_field(v, "avatar_url").or_else(|| str_field(v, "thumbnail")),
        email: str_field(v, "email"),
        phone: str_field(v, "phone_number"),
        kind: str_field(v, "type"),
    }
}

fn extract_media(payload: &Value) -> Vec<MediaItem> {
    let Some(attachments) = payload.get("attachments").and_then(Value::as_array) else {
        return Vec::new();
    };

    attachments
        .iter()
        .filter_map(|att| {
            let url = str_field(att, "data_url").or_else(|| str_field(att, "source_url"))?;
            let declared = str_field(att, "file_type");
            let mime = media::guess_mime(
                &url,
                str_field(att, "content_type")
                    .as_deref()
                    .or(declared.as_deref()),
            );
            let mut item = MediaItem::new(
                media::classify(declared.as_deref(), &url, mime.as_deref()),
                url,
            );
            item.mime_type = mime;
            item.file_name = str_field(att, "file_name").or_else(|| Some("attachment".to_string()));
            item.file_size = att.get("file_size").and_then(Value::as_u64);
            Some(item)
        })
        .collect()
}
