use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use omnichat_core::{
    credentials::{CredentialProvider, YCLOUD_API_KEY, YCLOUD_BASE_URL, YCLOUD_SENDER_NUMBER},
    TenantId,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    error::{ChannelError, Result},
    outbound::{message_id_from, OutboundSender, OutboundTarget},
    ycloud::PROVIDER,
};

const DEFAULT_BASE_URL: &str = "https://api.ycloud.com/v1";

/// Sends free-form WhatsApp text through YCloud. Only valid inside the
/// customer service window; callers gate on it.
pub struct YCloudClient {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl YCloudClient {
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
impl OutboundSender for YCloudClient {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn send_text(
        &self,
        tenant: TenantId,
        target: &OutboundTarget,
        text: &str,
    ) -> Result<Option<String>> {
        if target.external_user_id.is_empty() {
            return Err(ChannelError::InvalidTarget(
                "ycloud send needs a recipient number".to_string(),
            ));
        }
        let api_key = self.credentials.require(tenant, YCLOUD_API_KEY)?;
        let base = self
            .credentials
            .get(tenant, YCLOUD_BASE_URL)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let url = format!("{}/whatsapp/messages", base.trim_end_matches('/'));

        let mut body = json!({
            "to": target.external_user_id,
            "type": "text",
            "text": { "body": text },
        });
        if let Some(from) = self.credentials.get(tenant, YCLOUD_SENDER_NUMBER) {
            body["from"] = json!(from);
        }

        debug!(tenant = %tenant, to = %target.external_user_id, "sending ycloud message");

        let resp = self
            .client
            .post(&url)
            .header("X-API-Key", api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            warn!(tenant = %tenant, status, body = %text.chars().take(200).collect::<String>(), "ycloud API error");
            return Err(ChannelError::Api {
                status,
                message: text,
            });
        }

        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        Ok(message_id_from(&body, &["wamid", "id"]))
    }
}
