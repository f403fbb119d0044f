use omnichat_core::{MediaItem, TenantId};
use serde_json::Value;
use tracing::debug;

use crate::{
    adapter::{id_field, str_field, ChannelAdapter},
    error::{ChannelError, Result},
    media,
    types::{CanonicalMessage, SenderInfo},
};

pub const PROVIDER: &str = "ycloud";

const INBOUND_EVENT: &str = "whatsapp.inbound_message.received";
const ECHO_EVENT: &str = "whatsapp.smb.message.echoes";

const MEDIA_KINDS: &[&str] = &["image", "audio", "video", "document", "sticker", "voice"];

/// YCloud WhatsApp Business webhooks.
#[derive(Debug, Default)]
pub struct YCloudAdapter;

impl ChannelAdapter for YCloudAdapter {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn normalize(&self, payload: &Value, tenant: TenantId) -> Result<Vec<CanonicalMessage>> {
        let event = payload.get("type").and_then(Value::as_str).unwrap_or_default();
        let (message, is_echo) = match event {
            INBOUND_EVENT => (payload.get("whatsappInboundMessage"), false),
            ECHO_EVENT => (payload.get("whatsappMessage"), true),
            _ => {
                debug!(tenant = %tenant, event, "ycloud: ignoring event");
                return Ok(Vec::new());
            }
        };
        // Older deliveries carry the message under a generic key.
        let Some(message) = message.or_else(|| payload.get("message")) else {
            return Err(ChannelError::InvalidPayload(format!(
                "ycloud {event} without a message body"
            )));
        };

        let kind = str_field(message, "type").unwrap_or_else(|| "text".to_string());
        let (text, media) = extract_content(message, &kind);
        if text.is_none() && media.is_empty() {
            debug!(tenant = %tenant, kind = %kind, "ycloud: no content-bearing fields");
            return Ok(Vec::new());
        }

        // Echoes are sent from the business number; the customer is `to`.
        let customer_key = if is_echo { "to" } else { "from" };
        let external_user_id = str_field(message, customer_key).ok_or_else(|| {
            ChannelError::InvalidPayload(format!("ycloud message without `{customer_key}`"))
        })?;

        let display_name = if is_echo {
            None
        } else {
            message
                .get("customerProfile")
                .and_then(|p| str_field(p, "name"))
        };

        let msg = CanonicalMessage {
            provider: PROVIDER.to_string(),
            original_channel: "whatsapp".to_string(),
            external_user_id: external_user_id.clone(),
            display_name: display_name.clone(),
            tenant_id: tenant,
            text_content: text,
            media,
            is_agent_originated: is_echo,
            provider_message_id: str_field(message, "wamid").or_else(|| id_field(message, "id")),
            provider_conversation_id: None,
            provider_account_id: str_field(message, "wabaId"),
            sender_info: SenderInfo {
                id: Some(external_user_id.clone()),
                name: display_name,
                phone: Some(external_user_id),
                kind: Some(if is_echo { "business" } else { "customer" }.to_string()),
                ..SenderInfo::default()
            },
            raw_payload: payload.clone(),
        };

        debug!(
            tenant = %tenant,
            kind = %kind,
            media = msg.media.len(),
            agent = msg.is_agent_originated,
            "ycloud: normalized message"
        );
        Ok(vec![msg])
    }
}

fn extract_content(message: &Value, kind: &str) -> (Option<String>, Vec<MediaItem>) {
    let mut media_items = Vec::new();
    let text = match kind {
        "text" => message.get("text").and_then(|t| str_field(t, "body")),
        "button" => message
            .get("button")
            .and_then(|b| str_field(b, "text").or_else(|| str_field(b, "payload"))),
        "interactive" => message.get("interactive").and_then(interactive_text),
        k if MEDIA_KINDS.contains(&k) => {
            let body = message.get(k).unwrap_or(&Value::Null);
            if let Some(url) = str_field(body, "link").or_else(|| str_field(body, "url")) {
                let mime = media::guess_mime(&url, str_field(body, "mime_type").as_deref());
                let mut item = MediaItem::new(media::classify(Some(k), &url, mime.as_deref()), url);
                item.mime_type = mime;
                item.file_name = str_field(body, "filename");
                media_items.push(item);
            }
            str_field(body, "caption")
        }
        _ => None,
    };
    (text.filter(|t| !t.trim().is_empty()), media_items)
}

fn interactive_text(v: &Value) -> Option<String> {
    let reply = v
        .get("button_reply")
        .or_else(|| v.get("list_reply"))
        .unwrap_or(&Value::Null);
    str_field(reply, "title").or_else(|| str_field(reply, "id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnichat_core::MediaType;
    use serde_json::json;

    fn inbound(message: Value) -> Value {
        json!({
            "id": "evt_1",
            "type": INBOUND_EVENT,
            "whatsappInboundMessage": message,
        })
    }

    #[test]
    fn inbound_text() {
        let p = inbound(json!({
            "id": "ym_1",
            "wamid": "wamid.ABC",
            "wabaId": "waba_9",
            "from": "+5491111",
            "to": "+5490000",
            "type": "text",
            "text": { "body": "quiero un turno" },
            "customerProfile": { "name": "Ana" }
        }));
        let out = YCloudAdapter.normalize(&p, TenantId(1)).unwrap();
        assert_eq!(out.len(), 1);
        let m = &out[0];
        assert_eq!(m.external_user_id, "+5491111");
        assert_eq!(m.display_name.as_deref(), Some("Ana"));
        assert_eq!(m.text_content.as_deref(), Some("quiero un turno"));
        assert_eq!(m.provider_message_id.as_deref(), Some("wamid.ABC"));
        assert_eq!(m.original_channel, "whatsapp");
        assert!(!m.is_agent_originated);
    }

    #[test]
    fn echo_is_agent_originated_and_addressed_to_customer() {
        let p = json!({
            "type": ECHO_EVENT,
            "whatsappMessage": {
                "id": "ym_2",
                "from": "+5490000",
                "to": "+5491111",
                "type": "text",
                "text": { "body": "Hola, soy la secretaria" }
            }
        });
        let out = YCloudAdapter.normalize(&p, TenantId(1)).unwrap();
        assert!(out[0].is_agent_originated);
        assert_eq!(out[0].external_user_id, "+5491111");
        assert_eq!(out[0].provider_message_id.as_deref(), Some("ym_2"));
        assert!(out[0].display_name.is_none());
    }

    #[test]
    fn voice_note_and_caption() {
        let audio = inbound(json!({
            "from": "+1", "type": "audio",
            "audio": { "link": "https://api.ycloud.com/media/x", "mime_type": "audio/ogg; codecs=opus", "voice": true }
        }));
        let out = YCloudAdapter.normalize(&audio, TenantId(1)).unwrap();
        assert_eq!(out[0].media[0].media_type, MediaType::Audio);
        assert!(out[0].text_content.is_none());

        let image = inbound(json!({
            "from": "+1", "type": "image",
            "image": { "link": "https://cdn.test/i", "caption": "mi receta" }
        }));
        let out = YCloudAdapter.normalize(&image, TenantId(1)).unwrap();
        assert!(out[0].has_image());
        assert_eq!(out[0].text_content.as_deref(), Some("mi receta"));
    }

    #[test]
    fn interactive_reply_uses_title() {
        let p = inbound(json!({
            "from": "+1", "type": "interactive",
            "interactive": { "type": "button_reply", "button_reply": { "id": "b1", "title": "Confirmar" } }
        }));
        let out = YCloudAdapter.normalize(&p, TenantId(1)).unwrap();
        assert_eq!(out[0].text_content.as_deref(), Some("Confirmar"));
    }

    #[test]
    fn legacy_message_key_is_accepted() {
        let p = json!({
            "type": INBOUND_EVENT,
            "message": { "from": "+1", "type": "text", "text": { "body": "hi" } }
        });
        let out = YCloudAdapter.normalize(&p, TenantId(1)).unwrap();
        assert_eq!(out[0].text_content.as_deref(), Some("hi"));
    }

    #[test]
    fn status_updates_and_reactions_are_ignored() {
        let status = json!({ "type": "whatsapp.message.updated", "whatsappMessage": { "status": "read" } });
        assert!(YCloudAdapter.normalize(&status, TenantId(1)).unwrap().is_empty());

        let reaction = inbound(json!({
            "from": "+1", "type": "reaction", "reaction": { "emoji": "+1" }
        }));
        assert!(YCloudAdapter.normalize(&reaction, TenantId(1)).unwrap().is_empty());
    }

    #[test]
    fn missing_sender_is_an_error() {
        let p = inbound(json!({ "type": "text", "text": { "body": "hi" } }));
        assert!(YCloudAdapter.normalize(&p, TenantId(1)).is_err());
    }
}
