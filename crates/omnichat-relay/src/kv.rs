use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::error::Result;

/// Shared key/value store the debounce relay coordinates through.
///
/// Every operation is atomic with respect to concurrent callers on the
/// same key. Lists carry no expiry; scalar keys (timers, locks) always do.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Append to the list at `key`, returning its new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<usize>;

    async fn llen(&self, key: &str) -> Result<usize>;

    /// Read and delete the whole list in one step.
    async fn drain(&self, key: &str) -> Result<Vec<String>>;

    /// Remaining lifetime of a scalar key; `None` once expired or absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Set `key` to expire in `max(remaining, required)` and return that value.
    async fn extend_ttl_max(&self, key: &str, required: Duration) -> Result<Duration>;

    /// Like [`extend_ttl_max`](Self::extend_ttl_max) but only for a live
    /// key; an absent or expired key stays absent. `true` when extended.
    async fn extend_if_live(&self, key: &str, required: Duration) -> Result<bool>;

    /// Create `key` with `ttl` unless a live one exists. `true` when created.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Single-process store backed by [`DashMap`] and the tokio clock.
#[derive(Default)]
pub struct MemoryStore {
    lists: DashMap<String, Vec<String>>,
    expiring: DashMap<String, Instant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn remaining(&self, key: &str, now: Instant) -> Option<Duration> {
        self.expiring.remove_if(key, |_, exp| *exp <= now);
        self.expiring.get(key).map(|exp| exp.saturating_duration_since(now))
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let mut list = self.lists.entry(key.to_string()).or_default();
        list.push(value.to_string());
        Ok(list.len())
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        Ok(self.lists.get(key).map(|l| l.len()).unwrap_or(0))
    }

    async fn drain(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.lists.remove(key).map(|(_, v)| v).unwrap_or_default())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.remaining(key, Instant::now()))
    }

    async fn extend_ttl_max(&self, key: &str, required: Duration) -> Result<Duration> {
        let now = Instant::now();
        let mut exp = self.expiring.entry(key.to_string()).or_insert(now);
        let remaining = exp.saturating_duration_since(now);
        let final_ttl = remaining.max(required);
        *exp = now + final_ttl;
        Ok(final_ttl)
    }

    async fn extend_if_live(&self, key: &str, required: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.expiring.get_mut(key) {
            Some(mut exp) if *exp > now => {
                *exp = (*exp).max(now + required);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.expiring.entry(key.to_string()) {
            Entry::Occupied(e) if *e.get() > now => Ok(false),
            Entry::Occupied(mut e) => {
                e.insert(now + ttl);
                Ok(true)
            }
            Entry::Vacant(e) => {
                e.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lists.remove(key);
        self.expiring.remove(key);
        Ok(())
    }
}

/// Store on a SQLite file, shareable by several processes on one host.
///
/// Expiry uses the wall clock in milliseconds.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_lists (
                seq   INTEGER PRIMARY KEY AUTOINCREMENT,
                key   TEXT NOT NULL,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_kv_lists_key ON kv_lists(key, seq);

            CREATE TABLE IF NOT EXISTS kv_expiring (
                key        TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn live_expiry(conn: &Connection, key: &str, now: i64) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT expires_at FROM kv_expiring WHERE key = ?1 AND expires_at > ?2",
        rusqlite::params![key, now],
        |r| r.get(0),
    )
    .optional()
}

#[async_trait]
impl CoordinationStore for SqliteStore {
    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO kv_lists (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        let len: i64 = tx.query_row("SELECT COUNT(*) FROM kv_lists WHERE key = ?1", [key], |r| {
            r.get(0)
        })?;
        tx.commit()?;
        Ok(len as usize)
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let len: i64 = db.query_row("SELECT COUNT(*) FROM kv_lists WHERE key = ?1", [key], |r| {
            r.get(0)
        })?;
        Ok(len as usize)
    }

    #[instrument(skip(self))]
    async fn drain(&self, key: &str) -> Result<Vec<String>> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let values = {
            let mut stmt = tx.prepare("SELECT value FROM kv_lists WHERE key = ?1 ORDER BY seq")?;
            let rows = stmt.query_map([key], |r| r.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute("DELETE FROM kv_lists WHERE key = ?1", [key])?;
        tx.commit()?;
        debug!(count = values.len(), "drained list");
        Ok(values)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let db = self.db.lock().unwrap();
        let now = now_ms();
        Ok(live_expiry(&db, key, now)?.map(|exp| Duration::from_millis((exp - now) as u64)))
    }

    async fn extend_ttl_max(&self, key: &str, required: Duration) -> Result<Duration> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_ms();
        let remaining = live_expiry(&tx, key, now)?
            .map(|exp| Duration::from_millis((exp - now) as u64))
            .unwrap_or_default();
        let final_ttl = remaining.max(required);
        tx.execute(
            "INSERT INTO kv_expiring (key, expires_at) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
            rusqlite::params![key, now + final_ttl.as_millis() as i64],
        )?;
        tx.commit()?;
        Ok(final_ttl)
    }

    async fn extend_if_live(&self, key: &str, required: Duration) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let now = now_ms();
        let changed = db.execute(
            "UPDATE kv_expiring SET expires_at = MAX(expires_at, ?2)
             WHERE key = ?1 AND expires_at > ?3",
            rusqlite::params![key, now + required.as_millis() as i64, now],
        )?;
        Ok(changed == 1)
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let now = now_ms();
        // An expired row is replaced; a live one blocks the write.
        let changed = db.execute(
            "INSERT INTO kv_expiring (key, expires_at) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at
             WHERE kv_expiring.expires_at <= ?3",
            rusqlite::params![key, now + ttl.as_millis() as i64, now],
        )?;
        Ok(changed == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM kv_lists WHERE key = ?1", [key])?;
        db.execute("DELETE FROM kv_expiring WHERE key = ?1", [key])?;
        Ok(())
    }
}
