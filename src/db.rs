//! SQLite database shared by every durable store
//!
//! One connection guarded by a mutex. Each store method holds the lock for the
//! duration of a single statement (or a statement plus its read-back), which
//! makes those operations atomic with respect to every other session in the
//! process; SQLite's file locking covers other processes.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::Result;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS usage_counters (
        user_id TEXT NOT NULL,
        feature TEXT NOT NULL,
        day TEXT NOT NULL,
        count INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (user_id, feature, day)
    );

    CREATE TABLE IF NOT EXISTS summaries (
        article_id INTEGER PRIMARY KEY,
        content TEXT NOT NULL,
        user_id TEXT NOT NULL,
        generated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS profiles (
        user_id TEXT PRIMARY KEY,
        plan_id TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS favorites (
        user_id TEXT NOT NULL,
        article_id INTEGER NOT NULL,
        added_at TEXT NOT NULL,
        PRIMARY KEY (user_id, article_id)
    );

    CREATE INDEX IF NOT EXISTS idx_favorites_user
        ON favorites(user_id, added_at DESC);

    CREATE TABLE IF NOT EXISTS history (
        user_id TEXT NOT NULL,
        article_id INTEGER NOT NULL,
        viewed_at TEXT NOT NULL,
        PRIMARY KEY (user_id, article_id)
    );

    CREATE INDEX IF NOT EXISTS idx_history_user
        ON history(user_id, viewed_at DESC);

    CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL DEFAULT '',
        category TEXT,
        country TEXT,
        region TEXT,
        city TEXT,
        news_type TEXT,
        language TEXT,
        source_name TEXT NOT NULL DEFAULT '',
        source_url TEXT NOT NULL DEFAULT '',
        image_url TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        published_at TEXT,
        updated_at TEXT
    );
"#;

/// Handle to the portal database
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path` and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        // WAL lets readers in other processes proceed while a counter is written
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened portal database");

        Self::from_connection(conn)
    }

    /// Private in-memory database, mainly for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection, recovering from a poisoned lock
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned: PoisonError<MutexGuard<'_, Connection>>| {
                warn!("database mutex was poisoned, recovering connection");
                poisoned.into_inner()
            })
    }
}
