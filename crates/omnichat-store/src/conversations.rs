use chrono::{Duration, Utc};
use omnichat_core::{time, ConversationId, TenantId};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, instrument, warn};

use crate::db::Db;
use crate::error::{Result, StoreError};
use crate::types::{Conversation, ConversationFilter, ResolveRequest, Resolved};

const COLUMNS: &str = "id, tenant_id, channel, provider, external_user_id, display_name,
    provider_conversation_id, provider_account_id, status, human_override_until,
    last_message_at, last_message_preview, last_user_message_at, metadata,
    created_at, updated_at";

const DEFAULT_LIST_LIMIT: usize = 50;

/// Translates provider identities into persisted conversations.
///
/// Hot path: every inbound event calls `resolve_or_create`. Concurrent
/// callers for the same identity converge on a single row through the
/// `(tenant_id, channel, external_user_id)` unique key.
#[derive(Clone)]
pub struct ConversationStore {
    db: Db,
}

impl ConversationStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Find the conversation for an identity, creating it on first contact.
    ///
    /// Lookup order: provider conversation id (when supplied), then the
    /// natural key. Existing rows are merge-updated: present values replace,
    /// absent values never clear populated fields.
    #[instrument(skip(self, req), fields(tenant = %req.tenant, channel = %req.channel, external_user_id = %req.external_user_id))]
    pub fn resolve_or_create(&self, req: &ResolveRequest) -> Result<Resolved> {
        if req.external_user_id.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "external_user_id must not be empty".to_string(),
            ));
        }

        let db = self.db.lock().unwrap();

        let by_provider_id = match non_empty(&req.provider_conversation_id) {
            Some(pcid) => find_by_provider_conversation(&db, req.tenant, &req.provider, pcid)?,
            None => None,
        };
        let existing = match by_provider_id {
            Some(c) => Some(c),
            None => find_by_key(&db, req.tenant, &req.channel, &req.external_user_id)?,
        };

        if let Some(conv) = existing {
            debug!(conversation_id = %conv.id, "conversation hit");
            let updated = merge_update(&db, &conv, req)?;
            return Ok(Resolved::Existing(updated));
        }

        let id = ConversationId::new();
        let now = time::now_ts();
        let metadata = match non_empty(&req.avatar_url) {
            Some(avatar) => serde_json::json!({ "avatar_url": avatar }),
            None => serde_json::json!({}),
        };

        let inserted = db.execute(
            "INSERT INTO conversations
             (id, tenant_id, channel, provider, external_user_id, display_name,
              provider_conversation_id, provider_account_id, status, metadata,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'open', ?9, ?10, ?10)
             ON CONFLICT(tenant_id, channel, external_user_id) DO NOTHING",
            rusqlite::params![
                id.as_str(),
                req.tenant.get(),
                req.channel,
                req.provider,
                req.external_user_id,
                non_empty(&req.display_name),
                non_empty(&req.provider_conversation_id),
                non_empty(&req.provider_account_id),
                metadata.to_string(),
                now,
            ],
        )?;

        // Read back: another writer may have inserted first.
        let conv = find_by_key(&db, req.tenant, &req.channel, &req.external_user_id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {}", id)))?;

        if inserted == 1 {
            info!(conversation_id = %conv.id, provider = %req.provider, "new conversation");
            Ok(Resolved::Created(conv))
        } else {
            debug!(conversation_id = %conv.id, "lost insert race; using existing row");
            Ok(Resolved::Existing(conv))
        }
    }

    /// Tenant-scoped lookup. A foreign tenant's id yields `None`.
    #[instrument(skip(self), fields(tenant = %tenant, conversation_id = %id))]
    pub fn get(&self, tenant: TenantId, id: &ConversationId) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        find_by_id(&db, tenant, id)
    }

    /// Conversations for a tenant, most recent activity first.
    #[instrument(skip(self, filter), fields(tenant = %tenant))]
    pub fn list(&self, tenant: TenantId, filter: &ConversationFilter) -> Result<Vec<Conversation>> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(500) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        let now = time::now_ts();

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM conversations
             WHERE tenant_id = ?1
               AND (?2 IS NULL OR channel = ?2)
               AND (?3 = 0 OR (human_override_until IS NOT NULL AND human_override_until > ?4))
             ORDER BY last_message_at IS NULL, last_message_at DESC, updated_at DESC
             LIMIT ?5 OFFSET ?6"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![
                tenant.get(),
                filter.channel,
                filter.locked_only as i64,
                now,
                limit,
                offset
            ],
            row_to_conversation,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Silence the agent for `hours` from now because a human engaged.
    #[instrument(skip(self), fields(tenant = %tenant, conversation_id = %id))]
    pub fn mark_human_takeover(
        &self,
        tenant: TenantId,
        id: &ConversationId,
        hours: i64,
    ) -> Result<String> {
        let until = time::format_ts(Utc::now() + Duration::hours(hours));
        self.write_override(tenant, id, Some(&until))?;
        info!(until = %until, "human takeover; agent silenced");
        Ok(until)
    }

    /// Operator toggle: `enabled` sets now + `hours`, otherwise clears it.
    #[instrument(skip(self), fields(tenant = %tenant, conversation_id = %id))]
    pub fn set_human_override(
        &self,
        tenant: TenantId,
        id: &ConversationId,
        enabled: bool,
        hours: i64,
    ) -> Result<Option<String>> {
        if enabled {
            return self.mark_human_takeover(tenant, id, hours).map(Some);
        }
        self.write_override(tenant, id, None)?;
        info!("human override cleared");
        Ok(None)
    }

    fn write_override(&self, tenant: TenantId, id: &ConversationId, until: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE conversations SET human_override_until = ?1, updated_at = ?2
             WHERE id = ?3 AND tenant_id = ?4",
            rusqlite::params![until, time::now_ts(), id.as_str(), tenant.get()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }
        Ok(())
    }
}

fn merge_update(db: &Connection, conv: &Conversation, req: &ResolveRequest) -> Result<Conversation> {
    let mut external_user_id = conv.external_user_id.clone();
    if conv.external_user_id != req.external_user_id {
        match find_by_key(db, req.tenant, &conv.channel, &req.external_user_id)? {
            Some(other) if other.id != conv.id => {
                warn!(
                    conversation_id = %conv.id,
                    owner = %other.id,
                    external_user_id = %req.external_user_id,
                    "external id already owned by another conversation; keeping old id"
                );
            }
            _ => external_user_id = req.external_user_id.clone(),
        }
    }

    let mut metadata = conv.metadata.clone();
    if let (Some(avatar), Some(map)) = (non_empty(&req.avatar_url), metadata.as_object_mut()) {
        map.insert("avatar_url".to_string(), serde_json::json!(avatar));
    }

    db.execute(
        "UPDATE conversations SET
            external_user_id         = ?1,
            display_name             = COALESCE(?2, display_name),
            provider_conversation_id = COALESCE(?3, provider_conversation_id),
            provider_account_id      = COALESCE(?4, provider_account_id),
            metadata                 = ?5,
            updated_at               = ?6
         WHERE id = ?7",
        rusqlite::params![
            external_user_id,
            non_empty(&req.display_name),
            non_empty(&req.provider_conversation_id),
            non_empty(&req.provider_account_id),
            metadata.to_string(),
            time::now_ts(),
            conv.id.as_str(),
        ],
    )?;

    find_by_id(db, req.tenant, &conv.id)?
        .ok_or_else(|| StoreError::NotFound(format!("conversation {}", conv.id)))
}

fn find_by_key(
    db: &Connection,
    tenant: TenantId,
    channel: &str,
    external_user_id: &str,
) -> Result<Option<Conversation>> {
    Ok(db
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM conversations
                 WHERE tenant_id = ?1 AND channel = ?2 AND external_user_id = ?3"
            ),
            rusqlite::params![tenant.get(), channel, external_user_id],
            row_to_conversation,
        )
        .optional()?)
}

fn find_by_provider_conversation(
    db: &Connection,
    tenant: TenantId,
    provider: &str,
    provider_conversation_id: &str,
) -> Result<Option<Conversation>> {
    Ok(db
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM conversations
                 WHERE tenant_id = ?1 AND provider = ?2 AND provider_conversation_id = ?3
                 ORDER BY created_at LIMIT 1"
            ),
            rusqlite::params![tenant.get(), provider, provider_conversation_id],
            row_to_conversation,
        )
        .optional()?)
}

pub(crate) fn find_by_id(
    db: &Connection,
    tenant: TenantId,
    id: &ConversationId,
) -> Result<Option<Conversation>> {
    Ok(db
        .query_row(
            &format!("SELECT {COLUMNS} FROM conversations WHERE id = ?1 AND tenant_id = ?2"),
            rusqlite::params![id.as_str(), tenant.get()],
            row_to_conversation,
        )
        .optional()?)
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Map a SQLite row to a `Conversation`.
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let metadata: String = row.get(13)?;
    Ok(Conversation {
        id: ConversationId(row.get(0)?),
        tenant_id: TenantId(row.get(1)?),
        channel: row.get(2)?,
        provider: row.get(3)?,
        external_user_id: row.get(4)?,
        display_name: row.get(5)?,
        provider_conversation_id: row.get(6)?,
        provider_account_id: row.get(7)?,
        status: row.get(8)?,
        human_override_until: row.get(9)?,
        last_message_at: row.get(10)?,
        last_message_preview: row.get(11)?,
        last_user_message_at: row.get(12)?,
        // A corrupt metadata blob should not make the thread unreadable.
        metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn store() -> ConversationStore {
        ConversationStore::new(db::open_in_memory().unwrap())
    }

    fn req(user: &str) -> ResolveRequest {
        ResolveRequest::new(TenantId(1), "whatsapp", "ycloud", user)
    }

    #[test]
    fn creates_then_finds() {
        let s = store();
        let first = s.resolve_or_create(&req("+5491111")).unwrap();
        assert!(first.is_new());
        let second = s.resolve_or_create(&req("+5491111")).unwrap();
        assert!(!second.is_new());
        assert_eq!(first.conversation().id, second.conversation().id);
        assert_eq!(second.conversation().status, "open");
    }

    #[test]
    fn absent_values_do_not_clear_fields() {
        let s = store();
        let mut r = req("+1");
        r.display_name = Some("Ana".into());
        r.avatar_url = Some("https://cdn.test/ana.png".into());
        s.resolve_or_create(&r).unwrap();

        let mut again = req("+1");
        again.display_name = Some("  ".into());
        let conv = s.resolve_or_create(&again).unwrap().into_conversation();
        assert_eq!(conv.display_name.as_deref(), Some("Ana"));
        assert_eq!(conv.metadata["avatar_url"], "https://cdn.test/ana.png");

        let mut renamed = req("+1");
        renamed.display_name = Some("Ana Perez".into());
        let conv = s.resolve_or_create(&renamed).unwrap().into_conversation();
        assert_eq!(conv.display_name.as_deref(), Some("Ana Perez"));
    }

    #[test]
    fn provider_conversation_id_takes_precedence_and_updates_external_id() {
        let s = store();
        let mut r = ResolveRequest::new(TenantId(1), "instagram", "chatwoot", "77");
        r.provider_conversation_id = Some("42".into());
        let created = s.resolve_or_create(&r).unwrap().into_conversation();

        let mut drifted = ResolveRequest::new(TenantId(1), "instagram", "chatwoot", "ig_9001");
        drifted.provider_conversation_id = Some("42".into());
        let conv = s.resolve_or_create(&drifted).unwrap();
        assert!(!conv.is_new());
        assert_eq!(conv.conversation().id, created.id);
        assert_eq!(conv.conversation().external_user_id, "ig_9001");
    }

    #[test]
    fn external_id_collision_keeps_old_value() {
        let s = store();
        let mut a = ResolveRequest::new(TenantId(1), "whatsapp", "chatwoot", "+1");
        a.provider_conversation_id = Some("10".into());
        let a_conv = s.resolve_or_create(&a).unwrap().into_conversation();
        s.resolve_or_create(&ResolveRequest::new(TenantId(1), "whatsapp", "chatwoot", "+2"))
            .unwrap();

        let mut clash = ResolveRequest::new(TenantId(1), "whatsapp", "chatwoot", "+2");
        clash.provider_conversation_id = Some("10".into());
        let conv = s.resolve_or_create(&clash).unwrap().into_conversation();
        assert_eq!(conv.id, a_conv.id);
        assert_eq!(conv.external_user_id, "+1");
    }

    #[test]
    fn tenants_are_isolated() {
        let s = store();
        let conv = s.resolve_or_create(&req("+1")).unwrap().into_conversation();
        assert!(s.get(TenantId(2), &conv.id).unwrap().is_none());
        assert!(s.get(TenantId(1), &conv.id).unwrap().is_some());

        let other = s
            .resolve_or_create(&ResolveRequest::new(TenantId(2), "whatsapp", "ycloud", "+1"))
            .unwrap();
        assert!(other.is_new());
        assert_ne!(other.conversation().id, conv.id);
    }

    #[test]
    fn empty_external_id_is_rejected() {
        let s = store();
        assert!(matches!(
            s.resolve_or_create(&req(" ")),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn override_toggle_and_locked_filter() {
        let s = store();
        let a = s.resolve_or_create(&req("+1")).unwrap().into_conversation();
        s.resolve_or_create(&req("+2")).unwrap();

        let until = s.set_human_override(TenantId(1), &a.id, true, 24).unwrap();
        assert!(until.is_some());
        let locked = s
            .list(
                TenantId(1),
                &ConversationFilter {
                    locked_only: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].id, a.id);

        assert_eq!(s.set_human_override(TenantId(1), &a.id, false, 24).unwrap(), None);
        let all = s.list(TenantId(1), &ConversationFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|c| c.human_override_until.is_none()));

        assert!(matches!(
            s.set_human_override(TenantId(2), &a.id, true, 24),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn concurrent_resolution_converges_on_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.db");
        db::open(&path).unwrap();

        let ids: Vec<ConversationId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let path = path.clone();
                    scope.spawn(move || {
                        // Separate connections so the writers really race.
                        let s = ConversationStore::new(db::open(&path).unwrap());
                        s.resolve_or_create(&req("+5491111"))
                            .unwrap()
                            .into_conversation()
                            .id
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        let s = ConversationStore::new(db::open(&path).unwrap());
        assert_eq!(s.list(TenantId(1), &ConversationFilter::default()).unwrap().len(), 1);
    }
}
