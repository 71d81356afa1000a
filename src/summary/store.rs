//! Durable summary records
//!
//! One row per article. Inserts never overwrite: the first writer wins and
//! every writer reads back the stored row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::Database;
use crate::error::Result;

/// AI summary of one article, shared by every user once generated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub article_id: i64,
    pub content: String,
    /// User whose request produced the summary
    pub generated_by: String,
    pub generated_at: DateTime<Utc>,
}

/// Result of a first-writer-wins insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// The stored record, which may belong to an earlier writer
    pub record: SummaryRecord,
    /// True when this call created the record
    pub inserted: bool,
}

pub trait SummaryStore: Send + Sync {
    fn get(&self, article_id: i64) -> Result<Option<SummaryRecord>>;

    /// Insert unless a record exists; always returns the stored record
    fn insert_if_absent(&self, article_id: i64, content: &str, user_id: &str)
        -> Result<PutOutcome>;
}

/// Summaries table in the portal database
pub struct SqliteSummaryStore {
    db: Arc<Database>,
}

impl SqliteSummaryStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SummaryRecord> {
    let generated_at: String = row.get(3)?;
    Ok(SummaryRecord {
        article_id: row.get(0)?,
        content: row.get(1)?,
        generated_by: row.get(2)?,
        generated_at: DateTime::parse_from_rfc3339(&generated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
            })?,
    })
}

const SELECT_SUMMARY: &str =
    "SELECT article_id, content, user_id, generated_at FROM summaries WHERE article_id = ?1";

impl SummaryStore for SqliteSummaryStore {
    fn get(&self, article_id: i64) -> Result<Option<SummaryRecord>> {
        let conn = self.db.conn();
        let record = conn
            .query_row(SELECT_SUMMARY, params![article_id], record_from_row)
            .optional()?;
        Ok(record)
    }

    fn insert_if_absent(
        &self,
        article_id: i64,
        content: &str,
        user_id: &str,
    ) -> Result<PutOutcome> {
        let conn = self.db.conn();
        let inserted = conn.execute(
            r#"
            INSERT INTO summaries (article_id, content, user_id, generated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(article_id) DO NOTHING
            "#,
            params![article_id, content, user_id, Utc::now().to_rfc3339()],
        )? > 0;

        let record = conn.query_row(SELECT_SUMMARY, params![article_id], record_from_row)?;
        if !inserted {
            debug!(article_id, winner = %record.generated_by, "summary already stored");
        }

        Ok(PutOutcome { record, inserted })
    }
}
