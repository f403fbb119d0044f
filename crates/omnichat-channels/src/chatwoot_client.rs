use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use omnichat_core::{
    credentials::{CredentialProvider, CHATWOOT_API_TOKEN, CHATWOOT_BASE_URL},
    TenantId,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    chatwoot::PROVIDER,
    error::{ChannelError, Result},
    outbound::{message_id_from, OutboundSender, OutboundTarget},
};

/// Posts outgoing messages to a Chatwoot conversation.
pub struct ChatwootClient {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl ChatwootClient {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            credentials,
        }
    }
}

#[async_trait]
impl OutboundSender for ChatwootClient {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn send_text(
        &self,
        tenant: TenantId,
        target: &OutboundTarget,
        text: &str,
    ) -> Result<Option<String>> {
        let (Some(account), Some(conversation)) = (
            target.provider_account_id.as_deref(),
            target.provider_conversation_id.as_deref(),
        ) else {
            return Err(ChannelError::InvalidTarget(
                "chatwoot send needs account and conversation ids".to_string(),
            ));
        };

        let token = self.credentials.require(tenant, CHATWOOT_API_TOKEN)?;
        let base = self.credentials.require(tenant, CHATWOOT_BASE_URL)?;
        let url = format!(
            "{}/api/v1/accounts/{account}/conversations/{conversation}/messages",
            base.trim_end_matches('/')
        );

        debug!(tenant = %tenant, conversation, "sending chatwoot message");

        let resp = self
            .client
            .post(&url)
            .header("api_access_token", token)
            .json(&json!({
                "content": text,
                "message_type": "outgoing",
                "private": false,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!(tenant = %tenant, status, body = %body, "chatwoot API error");
            return Err(ChannelError::Api {
                status,
                message: body,
            });
        }

        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        Ok(message_id_from(&body, &["id"]))
    }
}
