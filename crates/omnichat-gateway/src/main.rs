use clap::Parser;
use omnichat_agent::{Agent, AgentRuntime, UnconfiguredAgent};
use omnichat_channels::{
    ChannelRouter, ChatwootClient, HttpMediaDownloader, OutboundRegistry, YCloudClient,
};
use omnichat_core::config::{KvBackend, OmnichatConfig};
use omnichat_core::credentials::{ConfigCredentials, CredentialProvider};
use omnichat_core::TenantId;
use omnichat_relay::{
    CoordinationStore, DebounceRelay, DebounceWindows, DispatchCoordinator, DispatchSettings,
    InboundPipeline, MemoryStore, OperatorService, SqliteStore,
};
use omnichat_store::{ConversationStore, MessageStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod app;
mod auth;
mod http;
mod ws;

use ws::broadcast::EventBroadcaster;

#[derive(Debug, Parser)]
#[command(name = "omnichat-gateway", version, about = "Omnichannel webhook relay")]
struct Cli {
    /// Config file (defaults to OMNICHAT_CONFIG, then ~/.omnichat/omnichat.toml).
    #[arg(long, short)]
    config: Option<String>,
    #[arg(long)]
    bind: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "omnichat_gateway=info,omnichat_relay=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let mut config = OmnichatConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        OmnichatConfig::default()
    });
    if let Some(bind) = cli.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = omnichat_store::db::open(&db_path)?;

    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(ConfigCredentials::new(config.tenants.clone()));
    info!(tenants = config.tenants.len(), "tenant credentials loaded");

    let conversations = ConversationStore::new(db.clone());
    let messages = MessageStore::new(db)
        .with_dedup_window(Duration::from_secs(config.relay.dedup_window_secs));
    let broadcaster = Arc::new(EventBroadcaster::new());

    let mut outbound = OutboundRegistry::new();
    outbound.register(Arc::new(ChatwootClient::new(credentials.clone())));
    outbound.register(Arc::new(YCloudClient::new(credentials.clone())));

    let agent: Arc<dyn Agent> = match AgentRuntime::from_config(&config.agent, &config.providers) {
        Some(runtime) => {
            info!(model = %runtime.model(), "agent runtime ready");
            Arc::new(runtime)
        }
        None => {
            warn!("No LLM provider configured; every turn gets the fallback reply");
            Arc::new(UnconfiguredAgent)
        }
    };

    let mut coordinator = DispatchCoordinator::new(
        conversations.clone(),
        messages.clone(),
        agent,
        outbound.clone(),
        broadcaster.clone(),
        DispatchSettings::from_config(&config.relay, &config.agent),
    );
    for tenant in &config.tenants {
        if let Some(prompt) = &tenant.system_prompt {
            coordinator = coordinator.with_tenant_prompt(TenantId(tenant.id), prompt.clone());
        }
    }

    let kv: Arc<dyn CoordinationStore> = match config.relay.kv {
        KvBackend::Memory => Arc::new(MemoryStore::new()),
        KvBackend::Sqlite => {
            let path = config.relay.kv_path.clone().unwrap_or_else(|| db_path.clone());
            ensure_parent_dir(&path);
            info!(path = %path, "debounce state on shared SQLite file");
            Arc::new(SqliteStore::open(&path)?)
        }
    };
    let relay = DebounceRelay::new(
        kv,
        Arc::new(coordinator),
        DebounceWindows::from_config(&config.relay),
    );

    let downloader = HttpMediaDownloader::new(
        &config.media.dir,
        config.media.max_bytes,
        Duration::from_secs(config.media.timeout_secs),
    )
    .with_credentials(credentials.clone());
    let router = ChannelRouter::with_default_adapters().with_downloader(Arc::new(downloader));

    let pipeline = InboundPipeline::new(
        Arc::new(router),
        conversations.clone(),
        messages.clone(),
        relay,
        broadcaster.clone(),
        config.relay.override_hours,
    );
    let operator = OperatorService::new(
        conversations.clone(),
        messages.clone(),
        outbound,
        broadcaster.clone(),
        config.relay.outbound_window_hours,
        config.relay.override_hours,
    );

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState {
        config,
        credentials,
        pipeline,
        operator,
        conversations,
        messages,
        broadcaster,
    });
    let router = app::build_router(state);

    info!("Omnichat gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
