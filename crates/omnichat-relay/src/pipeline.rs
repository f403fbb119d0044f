use std::sync::Arc;

use chrono::Utc;
use omnichat_channels::{CanonicalMessage, ChannelRouter};
use omnichat_core::{ConversationId, MediaItem, MediaType, Role, TenantId};
use omnichat_store::{AppendOutcome, ConversationStore, MessageStore, NewMessage, ResolveRequest};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};

use crate::debounce::DebounceRelay;
use crate::error::Result;
use crate::events::{EventSink, RelayEvent};
use crate::gate;

/// Body returned to the provider for every webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookReport {
    Ignored { reason: String },
    /// `count` is the number of newly stored messages.
    Processed { count: usize },
    Error { reason: String },
}

impl WebhookReport {
    pub fn ignored(reason: impl Into<String>) -> Self {
        WebhookReport::Ignored { reason: reason.into() }
    }
}

/// One attachment that needs a transcription or a vision description.
#[derive(Debug, Clone)]
pub struct EnrichmentRequest {
    pub tenant: TenantId,
    pub conversation_id: ConversationId,
    pub message_id: String,
    pub media: MediaItem,
}

/// External transcription/vision collaborator. Results come back through
/// [`MessageStore::merge_attachment_enrichment`]. Must not block.
pub trait EnrichmentHook: Send + Sync {
    fn request(&self, job: EnrichmentRequest);
}

/// Webhook body to stored messages to a buffered agent turn.
pub struct InboundPipeline {
    router: Arc<ChannelRouter>,
    conversations: ConversationStore,
    messages: MessageStore,
    relay: DebounceRelay,
    events: Arc<dyn EventSink>,
    enrichment: Option<Arc<dyn EnrichmentHook>>,
    override_hours: i64,
}

impl InboundPipeline {
    pub fn new(
        router: Arc<ChannelRouter>,
        conversations: ConversationStore,
        messages: MessageStore,
        relay: DebounceRelay,
        events: Arc<dyn EventSink>,
        override_hours: i64,
    ) -> Self {
        Self {
            router,
            conversations,
            messages,
            relay,
            events,
            enrichment: None,
            override_hours,
        }
    }

    pub fn with_enrichment(mut self, hook: Arc<dyn EnrichmentHook>) -> Self {
        self.enrichment = Some(hook);
        self
    }

    pub fn supports(&self, provider: &str) -> bool {
        self.router.supports(provider)
    }

    pub fn providers(&self) -> Vec<String> {
        self.router.providers()
    }

    /// Normalize and ingest one webhook. A failing message is logged and
    /// skipped; the rest of the batch still runs.
    #[instrument(skip(self, payload), fields(tenant = %tenant))]
    pub async fn process(&self, provider: &str, payload: &Value, tenant: TenantId) -> WebhookReport {
        let batch = self.router.route(provider, payload, tenant).await;
        if batch.is_empty() {
            debug!("no content-bearing messages");
            return WebhookReport::ignored("no_content");
        }

        let total = batch.len();
        let mut stored = 0;
        let mut failed = 0;
        let mut last_error = String::new();
        for msg in batch {
            match self.ingest(msg).await {
                Ok(true) => stored += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "failed to ingest message");
                    failed += 1;
                    last_error = e.to_string();
                }
            }
        }

        if failed == total {
            return WebhookReport::Error { reason: last_error };
        }
        WebhookReport::Processed { count: stored }
    }

    /// `Ok(false)` for duplicates.
    async fn ingest(&self, msg: CanonicalMessage) -> Result<bool> {
        let tenant = msg.tenant_id;
        let agent_originated = msg.is_agent_originated;

        let mut req = ResolveRequest::new(
            tenant,
            msg.original_channel.clone(),
            msg.provider.clone(),
            msg.external_user_id.clone(),
        );
        req.provider_conversation_id = msg.provider_conversation_id.clone();
        req.provider_account_id = msg.provider_account_id.clone();
        // Operator-sent events describe the operator, not the customer.
        if !agent_originated {
            req.display_name = msg.display_name.clone();
            req.avatar_url = msg.avatar_url().map(str::to_string);
        }
        let conv = self.conversations.resolve_or_create(&req)?.into_conversation();

        let role = if agent_originated { Role::HumanSupervisor } else { Role::User };
        let new = NewMessage {
            tenant,
            conversation_id: conv.id.clone(),
            role,
            content: msg.text_content.clone().unwrap_or_default(),
            attachments: msg.media.clone(),
            provider_message_id: msg.provider_message_id.clone(),
            platform_metadata: json!({ "provider": msg.provider, "raw": msg.raw_payload }),
        };
        let message_id = match self.messages.append(&new)? {
            AppendOutcome::Inserted(id) => id,
            AppendOutcome::Duplicate(id) => {
                debug!(conversation_id = %conv.id, message_id = %id, "duplicate delivery skipped");
                return Ok(false);
            }
        };

        self.events.emit(RelayEvent::NewMessage {
            tenant_id: tenant,
            conversation_id: conv.id.clone(),
            message_id: message_id.clone(),
            role,
            content: new.content.clone(),
            attachments: new.attachments.clone(),
            channel: conv.channel.clone(),
            external_user_id: conv.external_user_id.clone(),
            display_name: conv.display_name.clone(),
        });

        if agent_originated {
            let until = self
                .conversations
                .mark_human_takeover(tenant, &conv.id, self.override_hours)?;
            self.events.emit(RelayEvent::HumanOverride {
                tenant_id: tenant,
                conversation_id: conv.id.clone(),
                until: Some(until),
            });
            return Ok(true);
        }

        if let Some(hook) = &self.enrichment {
            for item in msg
                .media
                .iter()
                .filter(|m| matches!(m.media_type, MediaType::Audio | MediaType::Image))
            {
                hook.request(EnrichmentRequest {
                    tenant,
                    conversation_id: conv.id.clone(),
                    message_id: message_id.clone(),
                    media: item.clone(),
                });
            }
        }

        if gate::human_override_active(&conv, Utc::now()) {
            info!(conversation_id = %conv.id, "agent silenced by human override");
            return Ok(true);
        }

        if let Some(text) = msg.buffer_text() {
            self.relay
                .enqueue(tenant, &conv.id, &conv.external_user_id, &text, msg.has_image())
                .await?;
        }
        Ok(true)
    }
}
