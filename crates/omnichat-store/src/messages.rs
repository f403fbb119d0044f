use std::time::Duration;

use chrono::{DateTime, Utc};
use omnichat_core::{time, ConversationId, MediaItem, MediaType, Role, TenantId};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::db::Db;
use crate::error::{Result, StoreError};
use crate::types::{AppendOutcome, NewMessage, StoredMessage};

const COLUMNS: &str = "id, conversation_id, tenant_id, role, content, attachments,
    provider_message_id, platform_metadata, created_at";

const PREVIEW_CHARS: usize = 255;
const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// Append-only message log with duplicate suppression.
///
/// Providers redeliver webhooks and echo our own sends back, so every append
/// first checks for an existing copy inside the same write transaction.
#[derive(Clone)]
pub struct MessageStore {
    db: Db,
    dedup_window: Duration,
}

impl MessageStore {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Persist a message unless it is a duplicate.
    ///
    /// Duplicate when the conversation already holds (a) the same content and
    /// attachments within the dedup window, or (b) the same non-empty provider
    /// message id. A non-duplicate also refreshes the conversation's activity
    /// columns in the same transaction.
    #[instrument(skip(self, msg), fields(tenant = %msg.tenant, conversation_id = %msg.conversation_id, role = %msg.role))]
    pub fn append(&self, msg: &NewMessage) -> Result<AppendOutcome> {
        let provider_id = msg
            .provider_message_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let attachments = serde_json::to_string(&msg.attachments)?;
        let now = Utc::now();
        let now_ts = time::format_ts(now);
        let cutoff = time::format_ts(
            now - chrono::Duration::from_std(self.dedup_window).unwrap_or_else(|_| chrono::Duration::seconds(5)),
        );

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let owner: Option<i64> = tx
            .query_row(
                "SELECT tenant_id FROM conversations WHERE id = ?1",
                [msg.conversation_id.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        if owner != Some(msg.tenant.get()) {
            return Err(StoreError::NotFound(format!(
                "conversation {}",
                msg.conversation_id
            )));
        }

        if let Some(pid) = provider_id {
            if let Some(existing) = find_by_provider_id(&tx, &msg.conversation_id, pid)? {
                debug!(provider_message_id = pid, "duplicate by provider id");
                return Ok(AppendOutcome::Duplicate(existing));
            }
        }

        let recent_copy: Option<String> = tx
            .query_row(
                "SELECT id FROM messages
                 WHERE conversation_id = ?1 AND content = ?2 AND attachments = ?3
                   AND created_at >= ?4
                 ORDER BY created_at DESC LIMIT 1",
                rusqlite::params![msg.conversation_id.as_str(), msg.content, attachments, cutoff],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(existing) = recent_copy {
            debug!("duplicate content inside dedup window");
            return Ok(AppendOutcome::Duplicate(existing));
        }

        let id = Uuid::now_v7().to_string();
        let inserted = tx.execute(
            "INSERT INTO messages
             (id, conversation_id, tenant_id, role, content, attachments,
              provider_message_id, platform_metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                id,
                msg.conversation_id.as_str(),
                msg.tenant.get(),
                msg.role.as_str(),
                msg.content,
                attachments,
                provider_id,
                msg.platform_metadata.to_string(),
                now_ts,
            ],
        );
        if let Err(e) = inserted {
            // Another process won the provider-id race between our check and insert.
            if let (Some(pid), rusqlite::Error::SqliteFailure(f, _)) = (provider_id, &e) {
                if f.code == rusqlite::ErrorCode::ConstraintViolation {
                    drop(tx);
                    if let Some(existing) = find_by_provider_id(&db, &msg.conversation_id, pid)? {
                        return Ok(AppendOutcome::Duplicate(existing));
                    }
                }
            }
            return Err(e.into());
        }

        tx.execute(
            "UPDATE conversations SET
                last_message_at      = ?1,
                last_message_preview = ?2,
                last_user_message_at = CASE WHEN ?3 THEN ?1 ELSE last_user_message_at END,
                updated_at           = ?1
             WHERE id = ?4",
            rusqlite::params![
                now_ts,
                preview(&msg.content, &msg.attachments),
                msg.role == Role::User,
                msg.conversation_id.as_str(),
            ],
        )?;
        tx.commit()?;

        Ok(AppendOutcome::Inserted(id))
    }

    /// The last `limit` messages of a conversation in chronological order.
    #[instrument(skip(self), fields(tenant = %tenant, conversation_id = %conversation))]
    pub fn recent_history(
        &self,
        tenant: TenantId,
        conversation: &ConversationId,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let mut rows = self.list(tenant, conversation, limit, 0)?;
        rows.reverse();
        Ok(rows)
    }

    /// Page through a conversation, newest first.
    #[instrument(skip(self), fields(tenant = %tenant, conversation_id = %conversation))]
    pub fn list(
        &self,
        tenant: TenantId,
        conversation: &ConversationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE conversation_id = ?1 AND tenant_id = ?2
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![conversation.as_str(), tenant.get(), limit as i64, offset as i64],
            row_to_message,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Attach a vision description and/or audio transcription to the
    /// attachment with `url`. Re-applying the same values is a no-op.
    ///
    /// Returns `false` when the message or attachment is unknown.
    #[instrument(skip(self, description, transcription))]
    pub fn merge_attachment_enrichment(
        &self,
        message_id: &str,
        url: &str,
        description: Option<&str>,
        transcription: Option<&str>,
    ) -> Result<bool> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT attachments FROM messages WHERE id = ?1",
                [message_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(false);
        };

        let mut items: Vec<MediaItem> = serde_json::from_str(&raw)?;
        let Some(item) = items.iter_mut().find(|i| i.url == url) else {
            warn!(url, "enrichment for unknown attachment");
            return Ok(false);
        };
        if let Some(d) = description.filter(|d| !d.trim().is_empty()) {
            item.description = Some(d.to_string());
        }
        if let Some(t) = transcription.filter(|t| !t.trim().is_empty()) {
            item.transcription = Some(t.to_string());
        }

        tx.execute(
            "UPDATE messages SET attachments = ?1 WHERE id = ?2",
            rusqlite::params![serde_json::to_string(&items)?, message_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Distinct image descriptions from customer messages since `since`,
    /// oldest first.
    #[instrument(skip(self), fields(conversation_id = %conversation))]
    pub fn recent_visual_context(
        &self,
        conversation: &ConversationId,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT attachments FROM messages
             WHERE conversation_id = ?1 AND role = 'user' AND created_at >= ?2
               AND attachments <> '[]'
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![conversation.as_str(), time::format_ts(since)],
            |r| r.get::<_, String>(0),
        )?;

        let mut out: Vec<String> = Vec::new();
        for raw in rows.filter_map(|r| r.ok()) {
            let Ok(items) = serde_json::from_str::<Vec<MediaItem>>(&raw) else {
                continue;
            };
            for d in items
                .into_iter()
                .filter(|i| i.media_type == MediaType::Image)
                .filter_map(|i| i.description)
            {
                if !out.contains(&d) {
                    out.push(d);
                }
            }
        }
        Ok(out)
    }
}

fn find_by_provider_id(
    db: &Connection,
    conversation: &ConversationId,
    provider_message_id: &str,
) -> Result<Option<String>> {
    Ok(db
        .query_row(
            "SELECT id FROM messages WHERE conversation_id = ?1 AND provider_message_id = ?2",
            rusqlite::params![conversation.as_str(), provider_message_id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Conversation list preview: trimmed text, or a media placeholder.
pub fn preview(content: &str, attachments: &[MediaItem]) -> String {
    let text = content.trim();
    if !text.is_empty() {
        return text.chars().take(PREVIEW_CHARS).collect();
    }
    attachments
        .first()
        .map(|a| a.media_type.placeholder())
        .unwrap_or_default()
}

/// Map a SQLite row to a `StoredMessage`.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get(3)?;
    let attachments: String = row.get(5)?;
    let platform_metadata: String = row.get(7)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: ConversationId(row.get(1)?),
        tenant_id: TenantId(row.get(2)?),
        role: role.parse().unwrap_or(Role::User),
        content: row.get(4)?,
        attachments: serde_json::from_str(&attachments).unwrap_or_default(),
        provider_message_id: row.get(6)?,
        platform_metadata: serde_json::from_str(&platform_metadata)
            .unwrap_or_else(|_| serde_json::json!({})),
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, ConversationStore, ResolveRequest};

    struct Fixture {
        conversations: ConversationStore,
        messages: MessageStore,
        conv: ConversationId,
    }

    fn fixture() -> Fixture {
        let db = db::open_in_memory().unwrap();
        let conversations = ConversationStore::new(db.clone());
        let conv = conversations
            .resolve_or_create(&ResolveRequest::new(TenantId(1), "whatsapp", "ycloud", "+5491111"))
            .unwrap()
            .into_conversation()
            .id;
        Fixture {
            conversations,
            messages: MessageStore::new(db),
            conv,
        }
    }

    fn user_msg(f: &Fixture, text: &str) -> NewMessage {
        NewMessage::text(TenantId(1), f.conv.clone(), Role::User, text)
    }

    #[test]
    fn same_content_inside_window_is_duplicate() {
        let f = fixture();
        let first = f.messages.append(&user_msg(&f, "hola")).unwrap();
        let second = f.messages.append(&user_msg(&f, "hola")).unwrap();
        assert!(!first.is_duplicate());
        assert_eq!(second, AppendOutcome::Duplicate(first.id().to_string()));
        assert_eq!(f.messages.list(TenantId(1), &f.conv, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn same_content_outside_window_is_kept() {
        let f = fixture();
        let messages = MessageStore {
            db: f.messages.db.clone(),
            dedup_window: Duration::ZERO,
        };
        messages.append(&user_msg(&f, "ok")).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!messages.append(&user_msg(&f, "ok")).unwrap().is_duplicate());
    }

    #[test]
    fn provider_id_duplicates_forever() {
        let f = fixture();
        let mut m = user_msg(&f, "first");
        m.provider_message_id = Some("wamid.1".into());
        let first = f.messages.append(&m).unwrap();

        let mut later = user_msg(&f, "different text");
        later.provider_message_id = Some("wamid.1".into());
        let again = f.messages.append(&later).unwrap();
        assert_eq!(again, AppendOutcome::Duplicate(first.id().to_string()));
    }

    #[test]
    fn append_updates_conversation_activity() {
        let f = fixture();
        let long = "x".repeat(300);
        f.messages.append(&user_msg(&f, &long)).unwrap();
        let conv = f.conversations.get(TenantId(1), &f.conv).unwrap().unwrap();
        assert_eq!(conv.last_message_preview.as_deref().map(str::len), Some(255));
        assert!(conv.last_user_message_at.is_some());
        assert_eq!(conv.last_message_at, conv.last_user_message_at);

        std::thread::sleep(Duration::from_millis(5));
        let reply = NewMessage::text(TenantId(1), f.conv.clone(), Role::Assistant, "respuesta");
        f.messages.append(&reply).unwrap();
        let conv = f.conversations.get(TenantId(1), &f.conv).unwrap().unwrap();
        assert_eq!(conv.last_message_preview.as_deref(), Some("respuesta"));
        assert_ne!(conv.last_message_at, conv.last_user_message_at);
    }

    #[test]
    fn media_only_preview_uses_placeholder() {
        let f = fixture();
        let mut m = user_msg(&f, "");
        m.attachments = vec![MediaItem::new(MediaType::Audio, "/media/1/a.ogg")];
        f.messages.append(&m).unwrap();
        let conv = f.conversations.get(TenantId(1), &f.conv).unwrap().unwrap();
        assert_eq!(conv.last_message_preview.as_deref(), Some("[AUDIO]"));
    }

    #[test]
    fn foreign_tenant_cannot_append() {
        let f = fixture();
        let m = NewMessage::text(TenantId(2), f.conv.clone(), Role::User, "x");
        assert!(matches!(f.messages.append(&m), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn history_is_chronological_and_limited() {
        let f = fixture();
        for text in ["a", "b", "c", "d"] {
            f.messages.append(&user_msg(&f, text)).unwrap();
        }
        let history = f.messages.recent_history(TenantId(1), &f.conv, 3).unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["b", "c", "d"]);
    }

    #[test]
    fn enrichment_merge_is_idempotent_and_feeds_visual_context() {
        let f = fixture();
        let mut m = user_msg(&f, "");
        m.attachments = vec![MediaItem::new(MediaType::Image, "/media/1/rx.jpg")];
        let id = f.messages.append(&m).unwrap().id().to_string();

        for _ in 0..2 {
            assert!(f
                .messages
                .merge_attachment_enrichment(&id, "/media/1/rx.jpg", Some("a prescription"), None)
                .unwrap());
        }
        assert!(!f
            .messages
            .merge_attachment_enrichment(&id, "/media/1/other.jpg", Some("x"), None)
            .unwrap());
        assert!(!f
            .messages
            .merge_attachment_enrichment("missing", "/media/1/rx.jpg", Some("x"), None)
            .unwrap());

        let stored = f.messages.list(TenantId(1), &f.conv, 1, 0).unwrap();
        assert_eq!(
            stored[0].attachments[0].description.as_deref(),
            Some("a prescription")
        );

        let since = Utc::now() - chrono::Duration::minutes(5);
        let ctx = f.messages.recent_visual_context(&f.conv, since).unwrap();
        assert_eq!(ctx, vec!["a prescription".to_string()]);
    }
}
