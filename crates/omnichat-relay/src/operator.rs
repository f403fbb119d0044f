use std::sync::Arc;

use chrono::{Duration, Utc};
use omnichat_channels::{OutboundRegistry, OutboundTarget};
use omnichat_core::{ConversationId, Role, TenantId};
use omnichat_store::{ConversationStore, MessageStore, NewMessage};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::error::OperatorError;
use crate::events::{EventSink, RelayEvent};
use crate::gate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub provider_message_id: Option<String>,
    /// The agent stays silent until this instant.
    pub human_override_until: String,
}

/// Human operator actions on a conversation.
pub struct OperatorService {
    conversations: ConversationStore,
    messages: MessageStore,
    outbound: OutboundRegistry,
    events: Arc<dyn EventSink>,
    outbound_window: Duration,
    override_hours: i64,
}

impl OperatorService {
    pub fn new(
        conversations: ConversationStore,
        messages: MessageStore,
        outbound: OutboundRegistry,
        events: Arc<dyn EventSink>,
        outbound_window_hours: i64,
        override_hours: i64,
    ) -> Self {
        Self {
            conversations,
            messages,
            outbound,
            events,
            outbound_window: Duration::hours(outbound_window_hours),
            override_hours,
        }
    }

    /// Send `text` as the operator and silence the agent.
    ///
    /// Refused with [`OperatorError::Gate`] once the customer has been quiet
    /// longer than the outbound window.
    #[instrument(skip(self, text), fields(tenant = %tenant, conversation_id = %conversation_id))]
    pub async fn send(
        &self,
        tenant: TenantId,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<SendReceipt, OperatorError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(OperatorError::InvalidInput("message must not be empty".to_string()));
        }

        let conv = self
            .conversations
            .get(tenant, conversation_id)?
            .ok_or_else(|| OperatorError::NotFound(format!("conversation {conversation_id}")))?;

        if let Err(v) = gate::check_outbound_window(&conv, Utc::now(), self.outbound_window) {
            warn!(reason = v.reason(), "manual send refused");
            return Err(OperatorError::Gate(v));
        }

        let target = OutboundTarget {
            external_user_id: conv.external_user_id.clone(),
            provider_conversation_id: conv.provider_conversation_id.clone(),
            provider_account_id: conv.provider_account_id.clone(),
        };
        let provider_message_id = self
            .outbound
            .send_text(&conv.provider, tenant, &target, text)
            .await?;

        let mut msg = NewMessage::text(tenant, conv.id.clone(), Role::HumanSupervisor, text);
        msg.provider_message_id = provider_message_id.clone();
        msg.platform_metadata = json!({ "source": "operator" });
        let message_id = self.messages.append(&msg)?.id().to_string();

        let until = self
            .conversations
            .mark_human_takeover(tenant, &conv.id, self.override_hours)?;
        info!(provider = %conv.provider, until = %until, "manual message sent");

        self.events.emit(RelayEvent::NewMessage {
            tenant_id: tenant,
            conversation_id: conv.id.clone(),
            message_id: message_id.clone(),
            role: Role::HumanSupervisor,
            content: text.to_string(),
            attachments: Vec::new(),
            channel: conv.channel.clone(),
            external_user_id: conv.external_user_id.clone(),
            display_name: conv.display_name.clone(),
        });
        self.events.emit(RelayEvent::HumanOverride {
            tenant_id: tenant,
            conversation_id: conv.id,
            until: Some(until.clone()),
        });

        Ok(SendReceipt {
            message_id,
            provider_message_id,
            human_override_until: until,
        })
    }

    /// Operator toggle: silence the agent for the override period, or
    /// hand the conversation back to it.
    pub fn set_human_override(
        &self,
        tenant: TenantId,
        conversation_id: &ConversationId,
        enabled: bool,
    ) -> Result<Option<String>, OperatorError> {
        let until =
            self.conversations
                .set_human_override(tenant, conversation_id, enabled, self.override_hours)?;
        self.events.emit(RelayEvent::HumanOverride {
            tenant_id: tenant,
            conversation_id: conversation_id.clone(),
            until: until.clone(),
        });
        Ok(until)
    }
}
