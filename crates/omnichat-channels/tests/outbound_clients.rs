use std::sync::Arc;

use omnichat_channels::{
    ChannelError, ChatwootClient, OutboundRegistry, OutboundSender, OutboundTarget, YCloudClient,
};
use omnichat_core::{
    config::{ChatwootCredentials, TenantConfig, YCloudCredentials},
    credentials::ConfigCredentials,
    TenantId,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credentials(base_url: &str, sender: Option<&str>) -> Arc<ConfigCredentials> {
    Arc::new(ConfigCredentials::new(vec![TenantConfig {
        id: 1,
        name: Some("Clinic".into()),
        webhook_token: "hook".into(),
        webhook_secret: None,
        system_prompt: None,
        chatwoot: Some(ChatwootCredentials {
            base_url: base_url.to_string(),
            api_token: "cw-token".into(),
        }),
        ycloud: Some(YCloudCredentials {
            api_key: "yc-key".into(),
            sender_number: sender.map(String::from),
            base_url: format!("{base_url}/v1"),
        }),
    }]))
}

fn target() -> OutboundTarget {
    OutboundTarget {
        external_user_id: "+5491111".into(),
        provider_conversation_id: Some("42".into()),
        provider_account_id: Some("3".into()),
    }
}

#[tokio::test]
async fn chatwoot_posts_outgoing_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/accounts/3/conversations/42/messages"))
        .and(header("api_access_token", "cw-token"))
        .and(body_json(json!({
            "content": "Hola Ana",
            "message_type": "outgoing",
            "private": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 5001 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ChatwootClient::new(credentials(&server.uri(), None));
    let id = client
        .send_text(TenantId(1), &target(), "Hola Ana")
        .await
        .unwrap();
    assert_eq!(id.as_deref(), Some("5001"));
}

#[tokio::test]
async fn chatwoot_requires_provider_ids() {
    let client = ChatwootClient::new(credentials("http://127.0.0.1:9", None));
    let t = OutboundTarget {
        provider_conversation_id: None,
        ..target()
    };
    let err = client.send_text(TenantId(1), &t, "x").await.unwrap_err();
    assert!(matches!(err, ChannelError::InvalidTarget(_)));
}

#[tokio::test]
async fn ycloud_sends_text_with_sender_number() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/whatsapp/messages"))
        .and(header("X-API-Key", "yc-key"))
        .and(body_json(json!({
            "to": "+5491111",
            "type": "text",
            "text": { "body": "Su turno es el lunes" },
            "from": "+5490000"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "ym_1", "wamid": "wamid.X" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = YCloudClient::new(credentials(&server.uri(), Some("+5490000")));
    let id = client
        .send_text(TenantId(1), &target(), "Su turno es el lunes")
        .await
        .unwrap();
    assert_eq!(id.as_deref(), Some("wamid.X"));
}

#[tokio::test]
async fn api_errors_surface_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let client = YCloudClient::new(credentials(&server.uri(), None));
    let err = client
        .send_text(TenantId(1), &target(), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::Api { status: 401, .. }));
}

#[tokio::test]
async fn registry_routes_by_provider_and_reports_unknown() {
    let creds = credentials("http://127.0.0.1:9", None);
    let mut registry = OutboundRegistry::new();
    registry.register(Arc::new(ChatwootClient::new(creds.clone())));
    registry.register(Arc::new(YCloudClient::new(creds)));

    assert!(registry.get("chatwoot").is_some());
    assert!(registry.get("ycloud").is_some());
    let err = registry
        .send_text("telegram", TenantId(1), &target(), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::UnknownProvider(_)));
}

#[tokio::test]
async fn missing_tenant_credentials_are_reported() {
    let client = YCloudClient::new(credentials("http://127.0.0.1:9", None));
    let err = client
        .send_text(TenantId(2), &target(), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::MissingCredential(_)));
}
