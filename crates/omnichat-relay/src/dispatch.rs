use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use omnichat_agent::{Agent, Message};
use omnichat_channels::{OutboundRegistry, OutboundTarget};
use omnichat_core::config::{AgentConfig, RelayConfig};
use omnichat_core::{ConversationId, Role, TenantId};
use omnichat_store::{Conversation, ConversationStore, MessageStore, NewMessage, StoredMessage};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::debounce::{BufferedBatch, DispatchSink};
use crate::events::{EventSink, RelayEvent};
use crate::gate::{self, GateViolation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Replied { message_id: String },
    /// The agent failed; the fixed fallback reply was sent instead.
    Fallback { message_id: String },
    Suppressed(GateViolation),
    Skipped(String),
}

/// Knobs for [`DispatchCoordinator`], normally taken from `[relay]` and `[agent]`.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub history_limit: usize,
    /// How far back image descriptions are folded into the prompt.
    pub visual_context: Duration,
    pub system_prompt: String,
    pub fallback_reply: String,
}

impl DispatchSettings {
    pub fn from_config(relay: &RelayConfig, agent: &AgentConfig) -> Self {
        Self {
            history_limit: relay.history_limit,
            visual_context: Duration::seconds(relay.visual_context_secs),
            system_prompt: agent.system_prompt.clone(),
            fallback_reply: agent.fallback_reply.clone(),
        }
    }
}

/// Turns a drained buffer into one agent reply: gate, prompt, send, persist.
pub struct DispatchCoordinator {
    conversations: ConversationStore,
    messages: MessageStore,
    agent: Arc<dyn Agent>,
    outbound: OutboundRegistry,
    events: Arc<dyn EventSink>,
    settings: DispatchSettings,
    tenant_prompts: HashMap<TenantId, String>,
}

impl DispatchCoordinator {
    pub fn new(
        conversations: ConversationStore,
        messages: MessageStore,
        agent: Arc<dyn Agent>,
        outbound: OutboundRegistry,
        events: Arc<dyn EventSink>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            conversations,
            messages,
            agent,
            outbound,
            events,
            settings,
            tenant_prompts: HashMap::new(),
        }
    }

    /// Replace the default system prompt for one tenant.
    pub fn with_tenant_prompt(mut self, tenant: TenantId, prompt: impl Into<String>) -> Self {
        self.tenant_prompts.insert(tenant, prompt.into());
        self
    }

    fn system_prompt(&self, tenant: TenantId) -> &str {
        self.tenant_prompts
            .get(&tenant)
            .map(String::as_str)
            .unwrap_or(&self.settings.system_prompt)
    }

    #[instrument(skip(self, buffered), fields(tenant = %tenant, conversation_id = %conversation_id))]
    pub async fn dispatch(
        &self,
        tenant: TenantId,
        conversation_id: &ConversationId,
        external_user_id: &str,
        buffered: Vec<String>,
    ) -> DispatchOutcome {
        if buffered.is_empty() {
            return DispatchOutcome::Skipped("empty_batch".to_string());
        }
        let conv = match self.conversations.get(tenant, conversation_id) {
            Ok(Some(c)) => c,
            Ok(None) => {
                warn!("conversation vanished before dispatch");
                return DispatchOutcome::Skipped("conversation_not_found".to_string());
            }
            Err(e) => {
                error!(error = %e, "failed to load conversation");
                return DispatchOutcome::Skipped(format!("store_error: {e}"));
            }
        };

        // A human may have taken over while the buffer was filling.
        if let Err(v) = gate::check_human_override(&conv, Utc::now()) {
            info!(external_user_id, reason = v.reason(), "agent suppressed");
            return DispatchOutcome::Suppressed(v);
        }

        let history = self.history(tenant, conversation_id, &buffered);
        let input = self.with_visual_context(conversation_id, buffered.join("\n"));

        let (reply, fallback) = match self
            .agent
            .respond(&input, &history, self.system_prompt(tenant))
            .await
        {
            Ok(reply) => (reply, false),
            Err(e) => {
                warn!(error = %e, "agent failed; sending fallback reply");
                (self.settings.fallback_reply.clone(), true)
            }
        };

        let provider_message_id = self.send(tenant, &conv, &reply).await;

        let mut msg = NewMessage::text(tenant, conversation_id.clone(), Role::Assistant, &reply);
        msg.provider_message_id = provider_message_id;
        msg.platform_metadata = json!({ "source": "agent", "fallback": fallback });
        let message_id = match self.messages.append(&msg) {
            Ok(outcome) => outcome.id().to_string(),
            Err(e) => {
                error!(error = %e, "failed to persist reply");
                return DispatchOutcome::Skipped(format!("store_error: {e}"));
            }
        };

        self.events.emit(RelayEvent::NewMessage {
            tenant_id: tenant,
            conversation_id: conversation_id.clone(),
            message_id: message_id.clone(),
            role: Role::Assistant,
            content: reply,
            attachments: Vec::new(),
            channel: conv.channel.clone(),
            external_user_id: conv.external_user_id.clone(),
            display_name: conv.display_name.clone(),
        });

        if fallback {
            DispatchOutcome::Fallback { message_id }
        } else {
            DispatchOutcome::Replied { message_id }
        }
    }

    /// Recent history minus the trailing user turns that are the buffer itself.
    fn history(
        &self,
        tenant: TenantId,
        conversation_id: &ConversationId,
        buffered: &[String],
    ) -> Vec<Message> {
        let mut rows = match self
            .messages
            .recent_history(tenant, conversation_id, self.settings.history_limit)
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "history unavailable; continuing without it");
                return Vec::new();
            }
        };

        for text in buffered.iter().rev() {
            match rows.last() {
                Some(last) if last.role == Role::User && history_text(last) == text.trim() => {
                    rows.pop();
                }
                _ => break,
            }
        }

        rows.iter()
            .filter_map(|m| {
                let text = history_text(m);
                if text.is_empty() {
                    return None;
                }
                Some(match m.role {
                    Role::User => Message::user(text),
                    Role::Assistant | Role::HumanSupervisor => Message::assistant(text),
                })
            })
            .collect()
    }

    fn with_visual_context(&self, conversation_id: &ConversationId, mut input: String) -> String {
        let since = Utc::now() - self.settings.visual_context;
        match self.messages.recent_visual_context(conversation_id, since) {
            Ok(descriptions) if !descriptions.is_empty() => {
                debug!(count = descriptions.len(), "adding visual context");
                input.push_str("\n\nVISUAL CONTEXT (recent images):");
                for d in descriptions {
                    input.push_str(&format!("\n[IMAGE: {d}]"));
                }
                input
            }
            Ok(_) => input,
            Err(e) => {
                warn!(error = %e, "could not read visual context");
                input
            }
        }
    }

    async fn send(&self, tenant: TenantId, conv: &Conversation, text: &str) -> Option<String> {
        let target = OutboundTarget {
            external_user_id: conv.external_user_id.clone(),
            provider_conversation_id: conv.provider_conversation_id.clone(),
            provider_account_id: conv.provider_account_id.clone(),
        };
        match self.outbound.send_text(&conv.provider, tenant, &target, text).await {
            Ok(id) => {
                info!(provider = %conv.provider, "reply sent");
                id
            }
            Err(e) => {
                error!(provider = %conv.provider, error = %e, "failed to send reply");
                None
            }
        }
    }
}

/// Text a stored message contributes to history; media-only rows use
/// their placeholder, matching what was buffered for them.
fn history_text(m: &StoredMessage) -> String {
    let text = m.content.trim();
    if !text.is_empty() {
        return text.to_string();
    }
    m.attachments
        .first()
        .map(|a| a.media_type.placeholder())
        .unwrap_or_default()
}

#[async_trait]
impl DispatchSink for DispatchCoordinator {
    async fn deliver(&self, batch: BufferedBatch) {
        let outcome = self
            .dispatch(batch.tenant, &batch.conversation_id, &batch.external_user_id, batch.messages)
            .await;
        debug!(?outcome, "dispatch finished");
    }
}
