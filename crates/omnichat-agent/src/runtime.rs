use async_trait::async_trait;
use omnichat_core::config::{AgentConfig, ProvidersConfig};
use tracing::{debug, info, warn};

use crate::openai::OpenAiProvider;
use crate::provider::{ChatRequest, LlmProvider, Message, ProviderError};
use crate::router::{ProviderRouter, ProviderSlot};

/// Retries per configured endpoint before failing over to the next one.
const SLOT_RETRIES: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("model returned an empty reply")]
    EmptyResponse,

    #[error("no LLM provider configured")]
    NotConfigured,
}

/// Produces the automated reply for a coalesced customer turn.
#[async_trait]
pub trait Agent: Send + Sync {
    /// `history` is chronological and excludes `input` itself.
    async fn respond(
        &self,
        input: &str,
        history: &[Message],
        system_prompt: &str,
    ) -> Result<String, AgentError>;
}

/// LLM-backed [`Agent`] over any [`LlmProvider`], usually a [`ProviderRouter`].
pub struct AgentRuntime {
    provider: Box<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
}

impl AgentRuntime {
    pub fn new(provider: Box<dyn LlmProvider>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens,
        }
    }

    /// Builds a failover chain from `[providers]`: the OpenAI entry first,
    /// then each compat entry in file order. `None` when nothing is configured.
    pub fn from_config(agent: &AgentConfig, providers: &ProvidersConfig) -> Option<Self> {
        let mut slots = Vec::new();
        if let Some(openai) = &providers.openai {
            let p = OpenAiProvider::new(openai.api_key.clone(), Some(openai.base_url.clone()));
            slots.push(ProviderSlot::new(Box::new(p), SLOT_RETRIES));
        }
        for entry in &providers.openai_compat {
            let p = OpenAiProvider::new(entry.api_key.clone(), Some(entry.base_url.clone()))
                .with_name(entry.id.clone())
                .with_model(entry.model.clone());
            slots.push(ProviderSlot::new(Box::new(p), SLOT_RETRIES));
        }

        let router = ProviderRouter::new(slots)?;
        info!(providers = ?router.providers(), model = %agent.model, "agent runtime configured");
        Some(Self::new(Box::new(router), agent.model.clone(), agent.max_tokens))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Agent for AgentRuntime {
    async fn respond(
        &self,
        input: &str,
        history: &[Message],
        system_prompt: &str,
    ) -> Result<String, AgentError> {
        let mut messages = history.to_vec();
        messages.push(Message::user(input));

        let req = ChatRequest {
            model: self.model.clone(),
            system: system_prompt.to_string(),
            messages,
            max_tokens: self.max_tokens,
        };
        debug!(provider = %self.provider.name(), history = history.len(), "requesting reply");

        let resp = self.provider.send(&req).await?;
        let reply = resp.content.trim();
        if reply.is_empty() {
            return Err(AgentError::EmptyResponse);
        }
        info!(
            model = %resp.model,
            tokens_in = resp.tokens_in,
            tokens_out = resp.tokens_out,
            "reply generated"
        );
        Ok(reply.to_string())
    }
}

/// Stand-in used when no provider is configured; every call fails so the
/// dispatcher falls back to the fixed reply.
pub struct UnconfiguredAgent;

#[async_trait]
impl Agent for UnconfiguredAgent {
    async fn respond(&self, _: &str, _: &[Message], _: &str) -> Result<String, AgentError> {
        warn!("agent invoked without a configured provider");
        Err(AgentError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatResponse, ChatRole};
    use std::sync::{Arc, Mutex};

    struct Capture {
        seen: Arc<Mutex<Option<ChatRequest>>>,
        reply: &'static str,
    }

    #[async_trait]
    impl LlmProvider for Capture {
        fn name(&self) -> &str {
            "capture"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            *self.seen.lock().unwrap() = Some(req.clone());
            Ok(ChatResponse {
                content: self.reply.to_string(),
                model: req.model.clone(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "stop".into(),
            })
        }
    }

    #[tokio::test]
    async fn history_precedes_input() {
        let runtime = AgentRuntime::new(
            Box::new(Capture { seen: Default::default(), reply: "  claro  " }),
            "m",
            100,
        );
        let history = vec![Message::user("hola"), Message::assistant("¿en qué ayudo?")];
        let reply = runtime.respond("precio?", &history, "sys").await.unwrap();
        assert_eq!(reply, "claro");
    }

    #[tokio::test]
    async fn request_shape() {
        let seen = Arc::new(Mutex::new(None));
        let capture = Capture { seen: seen.clone(), reply: "ok" };
        let runtime = AgentRuntime::new(Box::new(capture), "gpt-test", 32);
        runtime.respond("b", &[Message::user("a")], "sys").await.unwrap();

        let req = seen.lock().unwrap().clone().unwrap();
        assert_eq!(req.model, "gpt-test");
        assert_eq!(req.system, "sys");
        assert_eq!(req.max_tokens, 32);
        let roles: Vec<ChatRole> = req.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::User]);
        assert_eq!(req.messages[1].content, "b");
    }

    #[tokio::test]
    async fn blank_reply_is_an_error() {
        let runtime = AgentRuntime::new(
            Box::new(Capture { seen: Default::default(), reply: "   " }),
            "m",
            10,
        );
        let err = runtime.respond("x", &[], "").await.unwrap_err();
        assert!(matches!(err, AgentError::EmptyResponse));
    }

    #[tokio::test]
    async fn unconfigured_agent_always_fails() {
        let err = UnconfiguredAgent.respond("x", &[], "").await.unwrap_err();
        assert!(matches!(err, AgentError::NotConfigured));
    }

    #[test]
    fn from_config_requires_a_provider() {
        let agent = AgentConfig::default();
        assert!(AgentRuntime::from_config(&agent, &ProvidersConfig::default()).is_none());
    }
}
