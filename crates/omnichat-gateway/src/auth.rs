//! Operator authentication for the conversation API and the event stream.

use axum::http::HeaderMap;
use omnichat_core::config::{AuthConfig, AuthMode};
use omnichat_core::credentials::constant_time_eq;

/// Check the operator token from `Authorization: Bearer <token>`, or from
/// `query_token` for clients that cannot set headers (browser WebSockets).
pub fn verify_operator(
    auth: &AuthConfig,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<(), String> {
    if auth.mode == AuthMode::None {
        return Ok(());
    }
    let expected = auth
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "no operator token configured".to_string())?;

    let presented = match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(h) => h
            .strip_prefix("Bearer ")
            .ok_or_else(|| "Authorization header must use Bearer scheme".to_string())?,
        None => query_token.ok_or_else(|| "missing Authorization header".to_string())?,
    };

    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err("bearer token mismatch".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn token_auth() -> AuthConfig {
        AuthConfig {
            mode: AuthMode::Token,
            token: Some("s3cret".into()),
        }
    }

    #[test]
    fn bearer_header_or_query_token() {
        let mut headers = HeaderMap::new();
        assert!(verify_operator(&token_auth(), &headers, None).is_err());
        assert!(verify_operator(&token_auth(), &headers, Some("s3cret")).is_ok());

        headers.insert("authorization", HeaderValue::from_static("Bearer s3cret"));
        assert!(verify_operator(&token_auth(), &headers, None).is_ok());

        headers.insert("authorization", HeaderValue::from_static("Bearer nope"));
        assert_eq!(
            verify_operator(&token_auth(), &headers, Some("s3cret")).unwrap_err(),
            "bearer token mismatch"
        );
    }

    #[test]
    fn mode_none_allows_everything() {
        let auth = AuthConfig {
            mode: AuthMode::None,
            token: None,
        };
        assert!(verify_operator(&auth, &HeaderMap::new(), None).is_ok());
    }
}
