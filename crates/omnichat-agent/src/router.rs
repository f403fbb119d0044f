use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// One provider inside the [`ProviderRouter`] and its retry budget.
pub struct ProviderSlot {
    pub provider: Box<dyn LlmProvider>,
    /// Extra attempts on this provider before failing over.
    pub max_retries: u32,
}

impl ProviderSlot {
    pub fn new(provider: Box<dyn LlmProvider>, max_retries: u32) -> Self {
        Self { provider, max_retries }
    }
}

/// Priority-ordered failover across LLM providers.
///
/// Each slot is retried up to its `max_retries` with a short linear
/// back-off. Rate limits and client errors (4xx) are not retried on the
/// same provider; the router moves on immediately.
pub struct ProviderRouter {
    slots: Vec<ProviderSlot>,
}

impl ProviderRouter {
    /// `None` when no slots are given.
    pub fn new(slots: Vec<ProviderSlot>) -> Option<Self> {
        if slots.is_empty() {
            return None;
        }
        Some(Self { slots })
    }

    /// Provider names in priority order.
    pub fn providers(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.provider.name()).collect()
    }

    async fn try_slot(&self, slot: &ProviderSlot, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let name = slot.provider.name();
        let mut attempt = 0;
        loop {
            let err = match slot.provider.send(req).await {
                Ok(resp) => {
                    if attempt > 0 {
                        info!(provider = %name, attempt, "request succeeded after retry");
                    }
                    return Ok(resp);
                }
                Err(e) => e,
            };
            warn!(provider = %name, attempt, err = %err, "provider send failed");

            if !is_retriable(&err) || attempt >= slot.max_retries {
                return Err(err);
            }
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
        }
    }
}

fn is_retriable(err: &ProviderError) -> bool {
    match err {
        ProviderError::RateLimited { .. } => false,
        ProviderError::Api { status, .. } => *status >= 500,
        _ => true,
    }
}

#[async_trait]
impl LlmProvider for ProviderRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_err = None;
        for slot in &self.slots {
            match self.try_slot(slot, req).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    info!(provider = %slot.provider.name(), "provider exhausted, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("all providers failed".to_string())))
    }
}
