use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use omnichat_core::TenantId;
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};

/// Provider identifiers needed to address a reply to one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundTarget {
    pub external_user_id: String,
    pub provider_conversation_id: Option<String>,
    pub provider_account_id: Option<String>,
}

/// Delivers text back through a provider's REST API.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    fn provider(&self) -> &str;

    /// Returns the provider-assigned message id when the API reports one.
    async fn send_text(
        &self,
        tenant: TenantId,
        target: &OutboundTarget,
        text: &str,
    ) -> Result<Option<String>>;
}

/// Outbound senders keyed by provider name.
#[derive(Default, Clone)]
pub struct OutboundRegistry {
    senders: HashMap<String, Arc<dyn OutboundSender>>,
}

impl OutboundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sender: Arc<dyn OutboundSender>) {
        self.senders.insert(sender.provider().to_string(), sender);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn OutboundSender>> {
        self.senders.get(provider).cloned()
    }

    pub async fn send_text(
        &self,
        provider: &str,
        tenant: TenantId,
        target: &OutboundTarget,
        text: &str,
    ) -> Result<Option<String>> {
        let sender = self
            .get(provider)
            .ok_or_else(|| ChannelError::UnknownProvider(provider.to_string()))?;
        sender.send_text(tenant, target, text).await
    }
}

/// Pull the message id out of a provider's JSON response.
pub(crate) fn message_id_from(body: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match body.get(*k)? {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    })
}
