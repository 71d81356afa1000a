//! SQLite-backed usage counters
//!
//! One row per (user, feature, day). Increments are single upsert statements
//! doing the arithmetic inside SQLite, so concurrent sessions never lose an
//! update. Daily rollover comes from the day in the key.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::clock::day_key;
use super::types::UsageFeature;
use crate::db::Database;
use crate::error::Result;

/// Count recorded for one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    pub day: String,
    pub count: u32,
}

/// Durable per-user, per-day counters for quota-limited features
pub trait UsageCounterStore: Send + Sync {
    /// Count for the given day; 0 when nothing was recorded
    fn current_count(&self, user_id: &str, feature: UsageFeature, day: NaiveDate) -> Result<u32>;

    /// Atomically add one and return the new count
    fn increment_and_get(&self, user_id: &str, feature: UsageFeature, day: NaiveDate)
        -> Result<u32>;

    /// Atomically add one only while the count is below `limit`.
    ///
    /// Returns the new count, or `None` when the limit was already reached.
    fn increment_if_below(
        &self,
        user_id: &str,
        feature: UsageFeature,
        day: NaiveDate,
        limit: u32,
    ) -> Result<Option<u32>>;

    /// Recorded days on or after `since`, oldest first
    fn history(&self, user_id: &str, feature: UsageFeature, since: NaiveDate)
        -> Result<Vec<DailyCount>>;

    /// Delete every counter older than `day`
    fn purge_before(&self, day: NaiveDate) -> Result<usize>;
}

/// Usage counters in the portal database
pub struct SqliteUsageStore {
    db: Arc<Database>,
}

impl SqliteUsageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl UsageCounterStore for SqliteUsageStore {
    fn current_count(&self, user_id: &str, feature: UsageFeature, day: NaiveDate) -> Result<u32> {
        let conn = self.db.conn();
        let count = conn
            .query_row(
                "SELECT count FROM usage_counters WHERE user_id = ?1 AND feature = ?2 AND day = ?3",
                params![user_id, feature.as_str(), day_key(day)],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    fn increment_and_get(
        &self,
        user_id: &str,
        feature: UsageFeature,
        day: NaiveDate,
    ) -> Result<u32> {
        let conn = self.db.conn();
        let count: u32 = conn.query_row(
            r#"
            INSERT INTO usage_counters (user_id, feature, day, count, updated_at)
            VALUES (?1, ?2, ?3, 1, ?4)
            ON CONFLICT(user_id, feature, day) DO UPDATE SET
                count = usage_counters.count + 1,
                updated_at = excluded.updated_at
            RETURNING count
            "#,
            params![user_id, feature.as_str(), day_key(day), Utc::now().to_rfc3339()],
            |row| row.get(0),
        )?;

        debug!(user = user_id, feature = feature.as_str(), count, "incremented usage");
        Ok(count)
    }

    fn increment_if_below(
        &self,
        user_id: &str,
        feature: UsageFeature,
        day: NaiveDate,
        limit: u32,
    ) -> Result<Option<u32>> {
        let conn = self.db.conn();
        // The SELECT form needs its WHERE clause for the upsert to parse
        let count: Option<u32> = conn
            .query_row(
                r#"
                INSERT INTO usage_counters (user_id, feature, day, count, updated_at)
                SELECT ?1, ?2, ?3, 1, ?4 WHERE ?5 > 0
                ON CONFLICT(user_id, feature, day) DO UPDATE SET
                    count = usage_counters.count + 1,
                    updated_at = excluded.updated_at
                WHERE usage_counters.count < ?5
                RETURNING count
                "#,
                params![
                    user_id,
                    feature.as_str(),
                    day_key(day),
                    Utc::now().to_rfc3339(),
                    limit
                ],
                |row| row.get(0),
            )
            .optional()?;

        match count {
            Some(count) => {
                debug!(user = user_id, feature = feature.as_str(), count, limit, "incremented usage");
            }
            None => {
                debug!(user = user_id, feature = feature.as_str(), limit, "usage already at limit");
            }
        }
        Ok(count)
    }

    fn history(
        &self,
        user_id: &str,
        feature: UsageFeature,
        since: NaiveDate,
    ) -> Result<Vec<DailyCount>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT day, count FROM usage_counters
             WHERE user_id = ?1 AND feature = ?2 AND day >= ?3
             ORDER BY day ASC",
        )?;

        let rows = stmt.query_map(params![user_id, feature.as_str(), day_key(since)], |row| {
            Ok(DailyCount {
                day: row.get(0)?,
                count: row.get(1)?,
            })
        })?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn purge_before(&self, day: NaiveDate) -> Result<usize> {
        let conn = self.db.conn();
        let deleted = conn.execute(
            "DELETE FROM usage_counters WHERE day < ?1",
            params![day_key(day)],
        )?;
        debug!(deleted, before = %day_key(day), "purged old usage counters");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteUsageStore {
        SqliteUsageStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn test_missing_counter_is_zero() {
        let store = store();
        assert_eq!(store.current_count("u1", UsageFeature::Summary, day(1)).unwrap(), 0);
    }

    #[test]
    fn test_increment_and_get() {
        let store = store();
        assert_eq!(store.increment_and_get("u1", UsageFeature::Summary, day(1)).unwrap(), 1);
        assert_eq!(store.increment_and_get("u1", UsageFeature::Summary, day(1)).unwrap(), 2);
        assert_eq!(store.current_count("u1", UsageFeature::Summary, day(1)).unwrap(), 2);
        // Other users are independent
        assert_eq!(store.current_count("u2", UsageFeature::Summary, day(1)).unwrap(), 0);
    }

    #[test]
    fn test_day_rollover_uses_fresh_counter() {
        let store = store();
        for _ in 0..3 {
            store.increment_and_get("u1", UsageFeature::Summary, day(1)).unwrap();
        }
        assert_eq!(store.current_count("u1", UsageFeature::Summary, day(1)).unwrap(), 3);
        assert_eq!(store.current_count("u1", UsageFeature::Summary, day(2)).unwrap(), 0);
    }

    #[test]
    fn test_increment_if_below_stops_at_limit() {
        let store = store();
        assert_eq!(
            store.increment_if_below("u1", UsageFeature::Summary, day(1), 2).unwrap(),
            Some(1)
        );
        assert_eq!(
            store.increment_if_below("u1", UsageFeature::Summary, day(1), 2).unwrap(),
            Some(2)
        );
        assert_eq!(
            store.increment_if_below("u1", UsageFeature::Summary, day(1), 2).unwrap(),
            None
        );
        assert_eq!(store.current_count("u1", UsageFeature::Summary, day(1)).unwrap(), 2);
    }

    #[test]
    fn test_increment_if_below_zero_limit_never_inserts() {
        let store = store();
        assert_eq!(
            store.increment_if_below("u1", UsageFeature::Summary, day(1), 0).unwrap(),
            None
        );
        assert!(store.history("u1", UsageFeature::Summary, day(1)).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_conditional_increments_never_overshoot() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..5)
                        .filter(|_| {
                            store
                                .increment_if_below("racer", UsageFeature::Summary, day(1), 3)
                                .unwrap()
                                .is_some()
                        })
                        .count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 3);
        assert_eq!(store.current_count("racer", UsageFeature::Summary, day(1)).unwrap(), 3);
    }

    #[test]
    fn test_history_and_purge() {
        let store = store();
        store.increment_and_get("u1", UsageFeature::Summary, day(1)).unwrap();
        store.increment_and_get("u1", UsageFeature::Summary, day(3)).unwrap();
        store.increment_and_get("u1", UsageFeature::Summary, day(3)).unwrap();

        let history = store.history("u1", UsageFeature::Summary, day(1)).unwrap();
        assert_eq!(
            history,
            vec![
                DailyCount { day: "2025-06-01".into(), count: 1 },
                DailyCount { day: "2025-06-03".into(), count: 2 },
            ]
        );

        assert_eq!(store.purge_before(day(2)).unwrap(), 1);
        assert_eq!(store.history("u1", UsageFeature::Summary, day(1)).unwrap().len(), 1);
    }
}
