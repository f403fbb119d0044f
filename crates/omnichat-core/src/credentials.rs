//! Per-tenant secret lookup.
//!
//! Outbound clients and webhook verification ask for secrets by name instead
//! of reading config directly, so a vault-backed provider can be dropped in.

use std::collections::HashMap;

use crate::config::TenantConfig;
use crate::error::{OmnichatError, Result};
use crate::types::TenantId;

pub const WEBHOOK_ACCESS_TOKEN: &str = "WEBHOOK_ACCESS_TOKEN";
pub const CHATWOOT_API_TOKEN: &str = "CHATWOOT_API_TOKEN";
pub const CHATWOOT_BASE_URL: &str = "CHATWOOT_BASE_URL";
pub const YCLOUD_API_KEY: &str = "YCLOUD_API_KEY";
pub const YCLOUD_BASE_URL: &str = "YCLOUD_BASE_URL";
pub const YCLOUD_SENDER_NUMBER: &str = "YCLOUD_SENDER_NUMBER";
pub const YCLOUD_WEBHOOK_SECRET: &str = "YCLOUD_WEBHOOK_SECRET";

/// Source of named per-tenant secrets.
pub trait CredentialProvider: Send + Sync {
    /// Returns `None` when the tenant has no value for `name`.
    fn get(&self, tenant: TenantId, name: &str) -> Option<String>;

    fn require(&self, tenant: TenantId, name: &str) -> Result<String> {
        self.get(tenant, name)
            .ok_or_else(|| OmnichatError::MissingCredential {
                tenant: tenant.get(),
                name: name.to_string(),
            })
    }

    /// Resolve the tenant owning a webhook access token.
    fn tenant_for_webhook_token(&self, token: &str) -> Option<TenantId>;
}

/// Credentials read from the `[[tenants]]` config tables.
pub struct ConfigCredentials {
    tenants: HashMap<TenantId, TenantConfig>,
}

impl ConfigCredentials {
    pub fn new(tenants: Vec<TenantConfig>) -> Self {
        let tenants = tenants
            .into_iter()
            .map(|t| (TenantId(t.id), t))
            .collect();
        Self { tenants }
    }

    pub fn tenant(&self, tenant: TenantId) -> Option<&TenantConfig> {
        self.tenants.get(&tenant)
    }
}

impl CredentialProvider for ConfigCredentials {
    fn get(&self, tenant: TenantId, name: &str) -> Option<String> {
        let t = self.tenants.get(&tenant)?;
        let value = match name {
            WEBHOOK_ACCESS_TOKEN => Some(t.webhook_token.clone()),
            CHATWOOT_API_TOKEN => t.chatwoot.as_ref().map(|c| c.api_token.clone()),
            CHATWOOT_BASE_URL => t.chatwoot.as_ref().map(|c| c.base_url.clone()),
            YCLOUD_API_KEY => t.ycloud.as_ref().map(|y| y.api_key.clone()),
            YCLOUD_BASE_URL => t.ycloud.as_ref().map(|y| y.base_url.clone()),
            YCLOUD_SENDER_NUMBER => t.ycloud.as_ref().and_then(|y| y.sender_number.clone()),
            YCLOUD_WEBHOOK_SECRET => t.webhook_secret.clone(),
            _ => None,
        };
        value.filter(|v| !v.is_empty())
    }

    fn tenant_for_webhook_token(&self, token: &str) -> Option<TenantId> {
        if token.is_empty() {
            return None;
        }
        self.tenants
            .values()
            .find(|t| constant_time_eq(t.webhook_token.as_bytes(), token.as_bytes()))
            .map(|t| TenantId(t.id))
    }
}

/// Equality that does not short-circuit on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
