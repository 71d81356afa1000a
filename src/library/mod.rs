//! Favorites and reading history
//!
//! Signed-in users are served from the portal database and gated by their
//! plan. Guests get [`LocalLibrary`], a JSON file on disk gated at free-plan
//! limits.

mod favorites;
mod history;
mod local;

pub use favorites::{
    FavoriteInsert, FavoriteOutcome, FavoriteRecord, FavoritesService, FavoritesStore,
    SqliteFavoritesStore,
};
pub use history::{HistoryRecord, HistoryService, HistoryStore, SqliteHistoryStore};
pub use local::{LocalFavorite, LocalHistoryEntry, LocalLibrary};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;

/// Most history entries ever listed or kept locally
pub const MAX_HISTORY_ENTRIES: usize = 100;

/// Fixed-width UTC timestamp, so text order matches time order in SQL
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
