//! Per-user favorites, capped by the plan's `max_favorites`

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{parse_timestamp, timestamp};
use crate::billing::{EntitlementEvaluator, FeatureAccessResult, Limit};
use crate::db::Database;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRecord {
    pub user_id: String,
    pub article_id: i64,
    pub added_at: DateTime<Utc>,
}

/// Result of adding or toggling a favorite
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum FavoriteOutcome {
    Added,
    AlreadyFavorite,
    Removed,
    Denied { access: FeatureAccessResult },
}

/// What a conditional insert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoriteInsert {
    Inserted,
    AlreadyPresent,
    /// Nothing inserted; the user already holds `current` favorites
    LimitReached { current: u32 },
}

pub trait FavoritesStore: Send + Sync {
    /// Insert the pair unless the user already holds `limit` favorites.
    /// The count check and the insert are one atomic step.
    fn add(&self, user_id: &str, article_id: i64, limit: Limit) -> Result<FavoriteInsert>;

    fn remove(&self, user_id: &str, article_id: i64) -> Result<bool>;

    fn contains(&self, user_id: &str, article_id: i64) -> Result<bool>;

    fn count(&self, user_id: &str) -> Result<u32>;

    /// Newest first
    fn list(&self, user_id: &str) -> Result<Vec<FavoriteRecord>>;

    fn clear(&self, user_id: &str) -> Result<usize>;
}

pub struct SqliteFavoritesStore {
    db: Arc<Database>,
}

impl SqliteFavoritesStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn favorite_from_row(row: &Row<'_>) -> rusqlite::Result<FavoriteRecord> {
    Ok(FavoriteRecord {
        user_id: row.get(0)?,
        article_id: row.get(1)?,
        added_at: parse_timestamp(row, 2)?,
    })
}

impl FavoritesStore for SqliteFavoritesStore {
    fn add(&self, user_id: &str, article_id: i64, limit: Limit) -> Result<FavoriteInsert> {
        // -1 disables the cap
        let max = limit.finite().map_or(-1, i64::from);
        let conn = self.db.conn();
        let inserted = conn.execute(
            "INSERT INTO favorites (user_id, article_id, added_at)
             SELECT ?1, ?2, ?3
             WHERE ?4 < 0 OR (SELECT COUNT(*) FROM favorites WHERE user_id = ?1) < ?4
             ON CONFLICT(user_id, article_id) DO NOTHING",
            params![user_id, article_id, timestamp(Utc::now()), max],
        )?;
        if inserted > 0 {
            return Ok(FavoriteInsert::Inserted);
        }

        let (present, current): (bool, u32) = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM favorites WHERE user_id = ?1 AND article_id = ?2),
                    (SELECT COUNT(*) FROM favorites WHERE user_id = ?1)",
            params![user_id, article_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if present {
            Ok(FavoriteInsert::AlreadyPresent)
        } else {
            Ok(FavoriteInsert::LimitReached { current })
        }
    }

    fn remove(&self, user_id: &str, article_id: i64) -> Result<bool> {
        let conn = self.db.conn();
        let deleted = conn.execute(
            "DELETE FROM favorites WHERE user_id = ?1 AND article_id = ?2",
            params![user_id, article_id],
        )?;
        Ok(deleted > 0)
    }

    fn contains(&self, user_id: &str, article_id: i64) -> Result<bool> {
        let conn = self.db.conn();
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM favorites WHERE user_id = ?1 AND article_id = ?2)",
            params![user_id, article_id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn count(&self, user_id: &str) -> Result<u32> {
        let conn = self.db.conn();
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM favorites WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn list(&self, user_id: &str) -> Result<Vec<FavoriteRecord>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, article_id, added_at FROM favorites
             WHERE user_id = ?1
             ORDER BY added_at DESC, article_id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], favorite_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn clear(&self, user_id: &str) -> Result<usize> {
        let conn = self.db.conn();
        Ok(conn.execute("DELETE FROM favorites WHERE user_id = ?1", params![user_id])?)
    }
}

/// Plan-gated favorites for signed-in users
pub struct FavoritesService {
    store: Arc<dyn FavoritesStore>,
    evaluator: Arc<EntitlementEvaluator>,
}

impl FavoritesService {
    pub fn new(store: Arc<dyn FavoritesStore>, evaluator: Arc<EntitlementEvaluator>) -> Self {
        Self { store, evaluator }
    }

    /// Add a favorite if the plan allows one more
    pub fn add(&self, user_id: &str, article_id: i64) -> Result<FavoriteOutcome> {
        let limit = self.evaluator.favorite_limit(Some(user_id))?;

        match self.store.add(user_id, article_id, limit)? {
            FavoriteInsert::Inserted => {
                info!(user = user_id, article_id, "added favorite");
                Ok(FavoriteOutcome::Added)
            }
            FavoriteInsert::AlreadyPresent => Ok(FavoriteOutcome::AlreadyFavorite),
            FavoriteInsert::LimitReached { current } => {
                debug!(user = user_id, current, "favorite limit reached");
                Ok(FavoriteOutcome::Denied {
                    access: self.evaluator.favorite_access(limit, current),
                })
            }
        }
    }

    pub fn remove(&self, user_id: &str, article_id: i64) -> Result<bool> {
        self.store.remove(user_id, article_id)
    }

    /// Remove when present, otherwise add (subject to the plan limit)
    pub fn toggle(&self, user_id: &str, article_id: i64) -> Result<FavoriteOutcome> {
        if self.store.remove(user_id, article_id)? {
            return Ok(FavoriteOutcome::Removed);
        }
        self.add(user_id, article_id)
    }

    pub fn is_favorite(&self, user_id: &str, article_id: i64) -> Result<bool> {
        self.store.contains(user_id, article_id)
    }

    pub fn list(&self, user_id: &str) -> Result<Vec<FavoriteRecord>> {
        self.store.list(user_id)
    }

    pub fn count(&self, user_id: &str) -> Result<u32> {
        self.store.count(user_id)
    }

    pub fn clear(&self, user_id: &str) -> Result<usize> {
        let removed = self.store.clear(user_id)?;
        info!(user = user_id, removed, "cleared favorites");
        Ok(removed)
    }
}
