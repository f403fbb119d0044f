use chrono::{DateTime, Duration, Utc};
use omnichat_core::time::parse_utc;
use omnichat_store::Conversation;
use serde::Serialize;

/// Why an automated or manual send is not allowed right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GateViolation {
    HumanOverrideActive { until: String },
    #[serde(rename = "messaging_window_closed")]
    WindowClosed { last_user_message_at: Option<String> },
}

impl GateViolation {
    /// Stable machine reason.
    pub fn reason(&self) -> &'static str {
        match self {
            GateViolation::HumanOverrideActive { .. } => "human_override_active",
            GateViolation::WindowClosed { .. } => "messaging_window_closed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            GateViolation::HumanOverrideActive { until } => {
                format!("a human operator owns this conversation until {until}")
            }
            GateViolation::WindowClosed { last_user_message_at: Some(at) } => {
                format!("the customer has not written since {at}; the messaging window is closed")
            }
            GateViolation::WindowClosed { last_user_message_at: None } => {
                "the customer has never written; the messaging window is closed".to_string()
            }
        }
    }
}

/// True while `human_override_until` lies in the future.
pub fn human_override_active(conv: &Conversation, now: DateTime<Utc>) -> bool {
    override_until(conv, now).is_some()
}

/// The override as a gate outcome, for callers that report the reason.
pub fn check_human_override(conv: &Conversation, now: DateTime<Utc>) -> Result<(), GateViolation> {
    match override_until(conv, now) {
        Some(until) => Err(GateViolation::HumanOverrideActive { until }),
        None => Ok(()),
    }
}

fn override_until(conv: &Conversation, now: DateTime<Utc>) -> Option<String> {
    let raw = conv.human_override_until.as_deref()?;
    let until = parse_utc(raw)?;
    (until > now).then(|| raw.to_string())
}

/// Free-form outbound messages require a customer message within `window`.
pub fn check_outbound_window(
    conv: &Conversation,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<(), GateViolation> {
    let last = conv.last_user_message_at.as_deref();
    match last.and_then(parse_utc) {
        Some(at) if now - at <= window => Ok(()),
        _ => Err(GateViolation::WindowClosed {
            last_user_message_at: last.map(str::to_string),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnichat_core::{time::format_ts, ConversationId, TenantId};

    fn conv() -> Conversation {
        Conversation {
            id: ConversationId("c".into()),
            tenant_id: TenantId(1),
            channel: "whatsapp".into(),
            provider: "ycloud".into(),
            external_user_id: "+5491111".into(),
            display_name: None,
            provider_conversation_id: None,
            provider_account_id: None,
            status: "open".into(),
            human_override_until: None,
            last_message_at: None,
            last_message_preview: None,
            last_user_message_at: None,
            metadata: serde_json::json!({}),
            created_at: format_ts(Utc::now()),
            updated_at: format_ts(Utc::now()),
        }
    }

    #[test]
    fn override_in_future_is_active() {
        let now = Utc::now();
        let mut c = conv();
        assert!(!human_override_active(&c, now));

        c.human_override_until = Some(format_ts(now + Duration::hours(1)));
        assert!(human_override_active(&c, now));
        let v = check_human_override(&c, now).unwrap_err();
        assert_eq!(v.reason(), "human_override_active");

        c.human_override_until = Some(format_ts(now - Duration::minutes(1)));
        assert!(!human_override_active(&c, now));
    }

    #[test]
    fn naive_override_is_read_as_utc() {
        let now = Utc::now();
        let mut c = conv();
        let naive = (now + Duration::hours(2)).format("%Y-%m-%d %H:%M:%S").to_string();
        c.human_override_until = Some(naive);
        assert!(human_override_active(&c, now));
    }

    #[test]
    fn window_closed_after_24h() {
        let now = Utc::now();
        let mut c = conv();

        let v = check_outbound_window(&c, now, Duration::hours(24)).unwrap_err();
        assert_eq!(v.reason(), "messaging_window_closed");

        c.last_user_message_at = Some(format_ts(now - Duration::hours(25)));
        let v = check_outbound_window(&c, now, Duration::hours(24)).unwrap_err();
        assert!(v.message().contains("window is closed"));

        c.last_user_message_at = Some(format_ts(now - Duration::hours(1)));
        assert!(check_outbound_window(&c, now, Duration::hours(24)).is_ok());
    }

    #[test]
    fn violation_serializes_reason() {
        let v = GateViolation::WindowClosed { last_user_message_at: None };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["reason"], "messaging_window_closed");
    }
}
