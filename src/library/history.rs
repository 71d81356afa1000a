//! Reading history, limited by the plan's `history_retention_days`
//!
//! One entry per (user, article). Viewing an article again moves its entry to
//! the front instead of adding a duplicate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{parse_timestamp, timestamp, MAX_HISTORY_ENTRIES};
use crate::billing::{EntitlementEvaluator, Limit};
use crate::db::Database;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub user_id: String,
    pub article_id: i64,
    pub viewed_at: DateTime<Utc>,
}

pub trait HistoryStore: Send + Sync {
    /// Insert or refresh the entry's timestamp
    fn record_view(&self, user_id: &str, article_id: i64, viewed_at: DateTime<Utc>) -> Result<()>;

    /// Newest first, optionally only entries viewed at or after `since`
    fn list(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>>;

    fn contains(&self, user_id: &str, article_id: i64) -> Result<bool>;

    fn remove(&self, user_id: &str, article_id: i64) -> Result<bool>;

    fn clear(&self, user_id: &str) -> Result<usize>;

    /// Delete entries viewed before `cutoff`
    fn prune_before(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<usize>;
}

pub struct SqliteHistoryStore {
    db: Arc<Database>,
}

impl SqliteHistoryStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    Ok(HistoryRecord {
        user_id: row.get(0)?,
        article_id: row.get(1)?,
        viewed_at: parse_timestamp(row, 2)?,
    })
}

impl HistoryStore for SqliteHistoryStore {
    fn record_view(&self, user_id: &str, article_id: i64, viewed_at: DateTime<Utc>) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO history (user_id, article_id, viewed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, article_id) DO UPDATE SET viewed_at = excluded.viewed_at",
            params![user_id, article_id, timestamp(viewed_at)],
        )?;
        Ok(())
    }

    fn list(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, article_id, viewed_at FROM history
             WHERE user_id = ?1 AND (?2 IS NULL OR viewed_at >= ?2)
             ORDER BY viewed_at DESC, article_id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![user_id, since.map(timestamp), limit as i64],
            history_from_row,
        )?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn contains(&self, user_id: &str, article_id: i64) -> Result<bool> {
        let conn = self.db.conn();
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM history WHERE user_id = ?1 AND article_id = ?2)",
            params![user_id, article_id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn remove(&self, user_id: &str, article_id: i64) -> Result<bool> {
        let conn = self.db.conn();
        let deleted = conn.execute(
            "DELETE FROM history WHERE user_id = ?1 AND article_id = ?2",
            params![user_id, article_id],
        )?;
        Ok(deleted > 0)
    }

    fn clear(&self, user_id: &str) -> Result<usize> {
        let conn = self.db.conn();
        Ok(conn.execute("DELETE FROM history WHERE user_id = ?1", params![user_id])?)
    }

    fn prune_before(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.db.conn();
        let deleted = conn.execute(
            "DELETE FROM history WHERE user_id = ?1 AND viewed_at < ?2",
            params![user_id, timestamp(cutoff)],
        )?;
        Ok(deleted)
    }
}

/// Oldest view still visible under a retention limit
pub(crate) fn retention_cutoff(retention: Limit, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    retention
        .finite()
        .map(|days| now - chrono::Duration::days(days as i64))
}

pub struct HistoryService {
    store: Arc<dyn HistoryStore>,
    evaluator: Arc<EntitlementEvaluator>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn HistoryStore>, evaluator: Arc<EntitlementEvaluator>) -> Self {
        Self { store, evaluator }
    }

    fn cutoff_for(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        let tier = self.evaluator.tier_for(Some(user_id))?;
        let retention = self.evaluator.catalog().limits_for(tier).history_retention_days;
        Ok(retention_cutoff(retention, Utc::now()))
    }

    pub fn record_view(&self, user_id: &str, article_id: i64) -> Result<()> {
        self.store.record_view(user_id, article_id, Utc::now())?;
        debug!(user = user_id, article_id, "recorded view");
        Ok(())
    }

    /// Most recent views within the plan's retention window
    pub fn list(&self, user_id: &str) -> Result<Vec<HistoryRecord>> {
        let cutoff = self.cutoff_for(user_id)?;
        self.store.list(user_id, cutoff, MAX_HISTORY_ENTRIES)
    }

    pub fn contains(&self, user_id: &str, article_id: i64) -> Result<bool> {
        self.store.contains(user_id, article_id)
    }

    pub fn remove(&self, user_id: &str, article_id: i64) -> Result<bool> {
        self.store.remove(user_id, article_id)
    }

    pub fn clear(&self, user_id: &str) -> Result<usize> {
        self.store.clear(user_id)
    }

    /// Delete entries older than the plan keeps
    pub fn prune_expired(&self, user_id: &str) -> Result<usize> {
        let Some(cutoff) = self.cutoff_for(user_id)? else {
            return Ok(0);
        };
        let pruned = self.store.prune_before(user_id, cutoff)?;
        if pruned > 0 {
            info!(user = user_id, pruned, "pruned expired history");
        }
        Ok(pruned)
    }
}
