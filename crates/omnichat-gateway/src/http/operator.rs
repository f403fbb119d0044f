//! Operator API over `/tenants/{tenant}/conversations`.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use omnichat_core::{ConversationId, TenantId};
use omnichat_relay::OperatorError;
use omnichat_store::ConversationFilter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use super::{api_error, ApiError};
use crate::app::AppState;
use crate::auth::verify_operator;

const MAX_PAGE: usize = 200;

#[derive(Debug, Deserialize)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct OverrideBody {
    pub enabled: bool,
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    verify_operator(&state.config.gateway.auth, headers, None).map_err(|reason| {
        warn!(reason = %reason, "operator authentication failed");
        api_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "authentication failed")
    })
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    error!(error = %e, "operator request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "internal error")
}

fn operator_error(e: OperatorError) -> ApiError {
    let status = match &e {
        OperatorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        OperatorError::NotFound(_) => StatusCode::NOT_FOUND,
        OperatorError::Gate(v) => {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": e.code(),
                    "reason": v.reason(),
                    "message": v.message(),
                })),
            );
        }
        OperatorError::Send(_) => StatusCode::BAD_GATEWAY,
        OperatorError::Store(_) => return internal(&e),
    };
    api_error(status, e.code(), e.to_string())
}

/// GET /tenants/{tenant}/conversations
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<i64>,
    Query(mut filter): Query<ConversationFilter>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    filter.limit = Some(filter.limit.unwrap_or(50).min(MAX_PAGE));
    let conversations = state
        .conversations
        .list(TenantId(tenant), &filter)
        .map_err(internal)?;
    Ok(Json(json!({ "conversations": conversations })))
}

/// GET /tenants/{tenant}/conversations/{id}/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path((tenant, id)): Path<(i64, String)>,
    Query(page): Query<Page>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let tenant = TenantId(tenant);
    let id = ConversationId(id);

    if state.conversations.get(tenant, &id).map_err(internal)?.is_none() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("conversation {id}"),
        ));
    }
    let limit = page.limit.unwrap_or(50).min(MAX_PAGE);
    let messages = state
        .messages
        .list(tenant, &id, limit, page.offset.unwrap_or(0))
        .map_err(internal)?;
    Ok(Json(json!({ "messages": messages })))
}

/// POST /tenants/{tenant}/conversations/{id}/send
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path((tenant, id)): Path<(i64, String)>,
    headers: HeaderMap,
    Json(body): Json<SendBody>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let receipt = state
        .operator
        .send(TenantId(tenant), &ConversationId(id), &body.text)
        .await
        .map_err(operator_error)?;
    Ok(Json(json!({ "ok": true, "receipt": receipt })))
}

/// POST /tenants/{tenant}/conversations/{id}/human-override
pub async fn set_human_override(
    State(state): State<Arc<AppState>>,
    Path((tenant, id)): Path<(i64, String)>,
    headers: HeaderMap,
    Json(body): Json<OverrideBody>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let until = state
        .operator
        .set_human_override(TenantId(tenant), &ConversationId(id), body.enabled)
        .map_err(operator_error)?;
    Ok(Json(json!({ "ok": true, "human_override_until": until })))
}
