use omnichat_core::TenantId;
use serde_json::Value;

use crate::{error::Result, types::CanonicalMessage};

/// Turns one provider's webhook body into canonical messages.
///
/// Implementations are pure: no I/O, no persistence. Events that carry no
/// customer-visible content (status callbacks, read receipts, private notes,
/// activity messages, empty messages) yield an empty vec, not an error.
pub trait ChannelAdapter: Send + Sync {
    /// Stable lowercase identifier used in the webhook path (e.g. `"chatwoot"`).
    ///
    /// The name is the key inside [`ChannelRouter`](crate::router::ChannelRouter)
    /// and must be unique across all registered adapters.
    fn provider(&self) -> &str;

    fn normalize(&self, payload: &Value, tenant: TenantId) -> Result<Vec<CanonicalMessage>>;
}

/// Non-empty string field.
pub(crate) fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Identifier that may be sent as a number or a string.
pub(crate) fn id_field(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
