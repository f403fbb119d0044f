//! Webhook ingress: POST /webhooks/{provider}?access_token=...
//!
//! Providers retry on anything but 2xx, so every outcome (including a bad
//! token) is answered with 200 and a [`WebhookReport`] body.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use hmac::{Hmac, Mac};
use omnichat_core::credentials::YCLOUD_WEBHOOK_SECRET;
use omnichat_relay::WebhookReport;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub access_token: Option<String>,
}

/// POST /webhooks/{provider}
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<WebhookReport> {
    let token = query.access_token.unwrap_or_default();
    let Some(tenant) = state.credentials.tenant_for_webhook_token(&token) else {
        warn!(provider = %provider, "webhook with unknown access token");
        return Json(WebhookReport::ignored("invalid_token"));
    };

    if !state.pipeline.supports(&provider) {
        warn!(provider = %provider, tenant = %tenant, "webhook for unsupported provider");
        return Json(WebhookReport::ignored("unsupported_provider"));
    }

    debug!(provider = %provider, tenant = %tenant, bytes = body.len(), "webhook arrived");

    if provider == "ycloud" {
        if let Some(secret) = state.credentials.get(tenant, YCLOUD_WEBHOOK_SECRET) {
            if let Err(reason) = verify_ycloud_signature(&headers, &body, &secret) {
                warn!(tenant = %tenant, reason = %reason, "webhook signature rejected");
                return Json(WebhookReport::ignored("invalid_signature"));
            }
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(provider = %provider, error = %e, "invalid JSON in webhook body");
            return Json(WebhookReport::ignored("invalid_json"));
        }
    };

    let report = state.pipeline.process(&provider, &payload, tenant).await;
    info!(provider = %provider, tenant = %tenant, report = ?report, "webhook handled");
    Json(report)
}

/// Verify `YCloud-Signature: t=<unix>,s=<hex>`, an HMAC-SHA256 over
/// `"{t}.{body}"` keyed with the tenant's webhook secret.
fn verify_ycloud_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), String> {
    let header = headers
        .get("ycloud-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing YCloud-Signature header".to_string())?;

    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("s", v)) => signature = Some(v),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or_else(|| "signature header has no timestamp".to_string())?;
    let signature = signature.ok_or_else(|| "signature header has no signature".to_string())?;

    let expected =
        hex::decode(signature).map_err(|_| "YCloud-Signature is not valid hex".to_string())?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid HMAC key length".to_string())?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    mac.verify_slice(&expected)
        .map_err(|_| "HMAC signature mismatch".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn sign(secret: &str, t: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{t}.").as_bytes());
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_a_valid_signature() {
        let body = br#"{"type":"whatsapp.inbound_message.received"}"#;
        let sig = sign("whsec", "1654084800", body);
        let mut headers = HeaderMap::new();
        headers.insert(
            "YCloud-Signature",
            HeaderValue::from_str(&format!("t=1654084800,s={sig}")).unwrap(),
        );
        assert!(verify_ycloud_signature(&headers, body, "whsec").is_ok());
    }

    #[test]
    fn rejects_tampered_body_and_missing_header() {
        let sig = sign("whsec", "1", b"{}");
        let mut headers = HeaderMap::new();
        assert!(verify_ycloud_signature(&headers, b"{}", "whsec").is_err());

        headers.insert(
            "ycloud-signature",
            HeaderValue::from_str(&format!("t=1,s={sig}")).unwrap(),
        );
        assert!(verify_ycloud_signature(&headers, b"{}", "whsec").is_ok());
        assert_eq!(
            verify_ycloud_signature(&headers, b"{\"x\":1}", "whsec").unwrap_err(),
            "HMAC signature mismatch"
        );
        assert!(verify_ycloud_signature(&headers, b"{}", "other").is_err());
    }

    #[test]
    fn malformed_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("ycloud-signature", HeaderValue::from_static("s=zz"));
        assert_eq!(
            verify_ycloud_signature(&headers, b"{}", "whsec").unwrap_err(),
            "signature header has no timestamp"
        );
    }
}
