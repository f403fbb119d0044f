use std::{collections::HashMap, sync::Arc};

use omnichat_core::TenantId;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    adapter::ChannelAdapter,
    chatwoot::ChatwootAdapter,
    download::{MediaDownloader, LOCAL_MEDIA_PREFIX},
    types::CanonicalMessage,
    ycloud::YCloudAdapter,
};

/// Dispatches webhook bodies to the adapter registered for the provider
/// and localizes any remote media before the messages are persisted.
///
/// Adapters are stored by their [`ChannelAdapter::provider`] name.
pub struct ChannelRouter {
    adapters: HashMap<String, Box<dyn ChannelAdapter>>,
    downloader: Option<Arc<dyn MediaDownloader>>,
}

impl ChannelRouter {
    /// Create an empty router with no registered adapters.
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            downloader: None,
        }
    }

    /// Router with the Chatwoot and YCloud adapters registered.
    pub fn with_default_adapters() -> Self {
        let mut router = Self::new();
        router.register(Box::new(ChatwootAdapter));
        router.register(Box::new(YCloudAdapter));
        router
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn MediaDownloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Register an adapter.
    ///
    /// If an adapter with the same provider name is already registered it is replaced.
    pub fn register(&mut self, adapter: Box<dyn ChannelAdapter>) {
        let name = adapter.provider().to_string();
        info!(provider = %name, "registering channel adapter");
        self.adapters.insert(name, adapter);
    }

    /// Registered provider names, sorted for deterministic output.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn supports(&self, provider: &str) -> bool {
        self.adapters.contains_key(provider)
    }

    /// Normalize a webhook body. Unknown providers and adapter errors are
    /// logged and produce an empty batch; nothing is thrown to the caller.
    pub async fn route(
        &self,
        provider: &str,
        payload: &Value,
        tenant: TenantId,
    ) -> Vec<CanonicalMessage> {
        let Some(adapter) = self.adapters.get(provider) else {
            error!(provider, tenant = %tenant, "unknown channel provider");
            return Vec::new();
        };

        let mut messages = match adapter.normalize(payload, tenant) {
            Ok(m) => m,
            Err(e) => {
                warn!(provider, tenant = %tenant, error = %e, "failed to normalize webhook");
                return Vec::new();
            }
        };

        if !messages.is_empty() {
            info!(provider, tenant = %tenant, count = messages.len(), "normalized webhook");
        }

        if let Some(downloader) = &self.downloader {
            for msg in &mut messages {
                for item in &mut msg.media {
                    if item.url.starts_with(LOCAL_MEDIA_PREFIX) {
                        continue;
                    }
                    item.url = downloader.download(&item.url, tenant, item.media_type).await;
                }
            }
        }

        messages
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::with_default_adapters()
    }
}
