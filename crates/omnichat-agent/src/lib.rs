pub mod openai;
pub mod provider;
pub mod router;
pub mod runtime;

pub use provider::{ChatRole, LlmProvider, Message, ProviderError};
pub use runtime::{Agent, AgentError, AgentRuntime, UnconfiguredAgent};
