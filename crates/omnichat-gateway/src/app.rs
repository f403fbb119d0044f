use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use omnichat_core::config::{OmnichatConfig, MAX_WEBHOOK_BYTES};
use omnichat_core::credentials::CredentialProvider;
use omnichat_relay::{InboundPipeline, OperatorService};
use omnichat_store::{ConversationStore, MessageStore};
use std::sync::Arc;
use tower_http::services::ServeDir;

use crate::ws::broadcast::EventBroadcaster;

/// Shared state passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: OmnichatConfig,
    pub credentials: Arc<dyn CredentialProvider>,
    pub pipeline: InboundPipeline,
    pub operator: OperatorService,
    pub conversations: ConversationStore,
    pub messages: MessageStore,
    /// Also the pipeline's and coordinator's event sink.
    pub broadcaster: Arc<EventBroadcaster>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let media = ServeDir::new(&state.config.media.dir);
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .route(
            "/webhooks/{provider}",
            post(crate::http::webhooks::webhook_handler),
        )
        .route(
            "/tenants/{tenant}/conversations",
            get(crate::http::operator::list_conversations),
        )
        .route(
            "/tenants/{tenant}/conversations/{id}/messages",
            get(crate::http::operator::list_messages),
        )
        .route(
            "/tenants/{tenant}/conversations/{id}/send",
            post(crate::http::operator::send_message),
        )
        .route(
            "/tenants/{tenant}/conversations/{id}/human-override",
            post(crate::http::operator::set_human_override),
        )
        .nest_service("/media", media)
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BYTES))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
