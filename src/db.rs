use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{CompareError, Result};

/// Key-value persistence used for auto-run configs. Values are opaque strings (JSON blobs).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

const SCHEMA_VERSION: i64 = 2;

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO schema_version (version) SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version LIMIT 1);
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let current_version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap_or(1);

        // Migration 002: track when each key was last written
        if current_version < 2 {
            conn.execute_batch(
                "
                ALTER TABLE kv_store ADD COLUMN updated_at TEXT;
                UPDATE kv_store SET updated_at = CURRENT_TIMESTAMP WHERE updated_at IS NULL;
                ",
            )?;
            conn.execute(
                "UPDATE schema_version SET version = ?1, applied_at = CURRENT_TIMESTAMP",
                params![SCHEMA_VERSION],
            )?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CompareError::Other(format!("database lock poisoned: {e}")))
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))?)
    }
}

impl KeyValueStore for Db {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }
}

/// Process-local store for tests and one-shot CLI runs.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self
            .values
            .lock()
            .map_err(|e| CompareError::Other(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self
            .values
            .lock()
            .map_err(|e| CompareError::Other(e.to_string()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_store_upserts() {
        let db = Db::open_in_memory().expect("db");
        assert_eq!(db.get("missing").expect("get"), None);
        db.set("k", "one").expect("set");
        db.set("k", "two").expect("set");
        assert_eq!(db.get("k").expect("get").as_deref(), Some("two"));
        assert_eq!(db.schema_version().expect("version"), SCHEMA_VERSION);
    }

    #[test]
    fn reopening_a_file_keeps_values_and_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("store.db");
        {
            let db = Db::new(path.clone()).expect("db");
            db.set("auto", "{}").expect("set");
        }
        let db = Db::new(path).expect("reopen");
        assert_eq!(db.get("auto").expect("get").as_deref(), Some("{}"));
        assert_eq!(db.schema_version().expect("version"), SCHEMA_VERSION);
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::default();
        store.set("a", "1").expect("set");
        assert_eq!(store.get("a").expect("get").as_deref(), Some("1"));
        assert_eq!(store.get("b").expect("get"), None);
    }
}
