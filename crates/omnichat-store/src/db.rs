use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use rusqlite::Connection;

use crate::error::Result;

/// Shared handle used by both stores so appends can update the owning
/// conversation inside one transaction.
pub type Db = Arc<Mutex<Connection>>;

/// Open (or create) the database file, apply pragmas and the schema.
pub fn open(path: impl AsRef<Path>) -> Result<Db> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    init_db(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory database with the schema applied. Used by tests and dry runs.
pub fn open_in_memory() -> Result<Db> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    init_db(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Initialise the conversations and messages tables and their indexes.
///
/// Idempotent; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id                       TEXT PRIMARY KEY,
            tenant_id                INTEGER NOT NULL,
            channel                  TEXT NOT NULL,
            provider                 TEXT NOT NULL,
            external_user_id         TEXT NOT NULL,
            display_name             TEXT,
            provider_conversation_id TEXT,
            provider_account_id      TEXT,
            status                   TEXT NOT NULL DEFAULT 'open',
            human_override_until     TEXT,
            last_message_at          TEXT,
            last_message_preview     TEXT,
            last_user_message_at     TEXT,
            metadata                 TEXT NOT NULL DEFAULT '{}',
            created_at               TEXT NOT NULL,
            updated_at               TEXT NOT NULL,
            UNIQUE (tenant_id, channel, external_user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_provider_conv
            ON conversations(tenant_id, provider, provider_conversation_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_recent
            ON conversations(tenant_id, last_message_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            conversation_id     TEXT NOT NULL REFERENCES conversations(id),
            tenant_id           INTEGER NOT NULL,
            role                TEXT NOT NULL,
            content             TEXT NOT NULL DEFAULT '',
            attachments         TEXT NOT NULL DEFAULT '[]',
            provider_message_id TEXT,
            platform_metadata   TEXT NOT NULL DEFAULT '{}',
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        CREATE UNIQUE INDEX IF NOT EXISTS uq_messages_provider_id
            ON messages(conversation_id, provider_message_id)
            WHERE provider_message_id IS NOT NULL AND provider_message_id <> '';",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }

    #[test]
    fn file_database_persists_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("omnichat.db");
        drop(open(&path).unwrap());
        let db = open(&path).unwrap();
        let conn = db.lock().unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('conversations', 'messages')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 2);
    }
}
