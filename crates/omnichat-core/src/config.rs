use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8088;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_WEBHOOK_BYTES: usize = 2 * 1024 * 1024; // providers inline large payloads
pub const DEFAULT_FALLBACK_REPLY: &str =
    "Sorry, I couldn't process your message right now. Please try again in a moment.";

/// Top-level config (omnichat.toml + OMNICHAT_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OmnichatConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Per-tenant webhook tokens and provider credentials.
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

/// Operator API authentication. Webhooks authenticate per tenant instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Token,
            token: Some("change-me".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Which backend holds the debounce buffers, timers and locks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KvBackend {
    /// Process-local; only correct when a single gateway process runs.
    #[default]
    Memory,
    /// Shared SQLite file; safe for several processes on one host.
    Sqlite,
}

/// Debounce, dedup and gate tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_base_window")]
    pub base_window_secs: u64,
    /// Longer silence required when an image is buffered, so vision
    /// enrichment can land before the agent reads the turn.
    #[serde(default = "default_image_window")]
    pub image_window_secs: u64,
    /// Added on top of the timer TTL for the single-flight lock TTL.
    #[serde(default = "default_lock_grace")]
    pub lock_grace_secs: u64,
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_hours_24")]
    pub override_hours: i64,
    #[serde(default = "default_hours_24")]
    pub outbound_window_hours: i64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// How far back image descriptions are collected for the agent turn.
    #[serde(default = "default_visual_context_secs")]
    pub visual_context_secs: i64,
    #[serde(default)]
    pub kv: KvBackend,
    /// SQLite file for `kv = "sqlite"`; defaults to the main database.
    pub kv_path: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_window_secs: default_base_window(),
            image_window_secs: default_image_window(),
            lock_grace_secs: default_lock_grace(),
            dedup_window_secs: default_dedup_window(),
            override_hours: default_hours_24(),
            outbound_window_hours: default_hours_24(),
            history_limit: default_history_limit(),
            visual_context_secs: default_visual_context_secs(),
            kv: KvBackend::default(),
            kv_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Root directory; files land in `{dir}/{tenant_id}/{uuid}{ext}`.
    #[serde(default = "default_media_dir")]
    pub dir: String,
    #[serde(default = "default_media_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_media_timeout")]
    pub timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            dir: default_media_dir(),
            max_bytes: default_media_max_bytes(),
            timeout_secs: default_media_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Default system prompt; tenants may override it.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: default_system_prompt(),
            fallback_reply: default_fallback_reply(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub openai: Option<OpenAiProviderConfig>,
    /// Additional OpenAI-compatible endpoints, tried in order after `openai`.
    #[serde(default)]
    pub openai_compat: Vec<OpenAiCompatEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatEntry {
    /// Label used in logs.
    pub id: String,
    pub api_key: String,
    pub base_url: String,
    /// Falls back to `agent.model` when not set.
    pub model: Option<String>,
}

/// One tenant's webhook binding and outbound credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: i64,
    pub name: Option<String>,
    /// Value of `?access_token=` on the tenant's webhook URLs.
    pub webhook_token: String,
    /// Optional YCloud signing secret; when set, signatures are verified.
    pub webhook_secret: Option<String>,
    pub system_prompt: Option<String>,
    pub chatwoot: Option<ChatwootCredentials>,
    pub ycloud: Option<YCloudCredentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatwootCredentials {
    #[serde(default = "default_chatwoot_base_url")]
    pub base_url: String,
    pub api_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YCloudCredentials {
    pub api_key: String,
    /// Business number messages are sent from.
    pub sender_number: Option<String>,
    #[serde(default = "default_ycloud_base_url")]
    pub base_url: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.omnichat/omnichat.db", home)
}
fn default_base_window() -> u64 {
    10
}
fn default_image_window() -> u64 {
    20
}
fn default_lock_grace() -> u64 {
    60
}
fn default_dedup_window() -> u64 {
    5
}
fn default_hours_24() -> i64 {
    24
}
fn default_history_limit() -> usize {
    10
}
fn default_visual_context_secs() -> i64 {
    300
}
fn default_media_dir() -> String {
    "media".to_string()
}
fn default_media_max_bytes() -> u64 {
    25 * 1024 * 1024
}
fn default_media_timeout() -> u64 {
    30
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful front-desk assistant. Answer briefly and politely.".to_string()
}
fn default_fallback_reply() -> String {
    DEFAULT_FALLBACK_REPLY.to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_chatwoot_base_url() -> String {
    "https://app.chatwoot.com".to_string()
}
fn default_ycloud_base_url() -> String {
    "https://api.ycloud.com/v1".to_string()
}

impl OmnichatConfig {
    /// Load config from a TOML file with OMNICHAT_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. OMNICHAT_CONFIG env var
    ///   3. ~/.omnichat/omnichat.toml
    ///
    /// Nested keys use a double underscore in env vars, e.g.
    /// `OMNICHAT_RELAY__BASE_WINDOW_SECS=15`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("OMNICHAT_CONFIG").ok())
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        let config: OmnichatConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("OMNICHAT_").split("__"))
            .extract()
            .map_err(|e| crate::error::OmnichatError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.omnichat/omnichat.toml", home)
}
