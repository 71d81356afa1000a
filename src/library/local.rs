//! Guest library kept in a local JSON file
//!
//! Anonymous readers get favorites and history without an account. Limits
//! are the free plan's. Every mutation rewrites the file atomically and only
//! becomes visible in memory once the write succeeded.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::favorites::FavoriteOutcome;
use super::history::retention_cutoff;
use super::MAX_HISTORY_ENTRIES;
use crate::billing::{EntitlementEvaluator, PlanTier};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFavorite {
    pub article_id: i64,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalHistoryEntry {
    pub article_id: i64,
    pub viewed_at: DateTime<Utc>,
}

/// On-disk layout; both lists newest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct LocalData {
    favorites: Vec<LocalFavorite>,
    history: Vec<LocalHistoryEntry>,
}

pub struct LocalLibrary {
    path: PathBuf,
    data: Mutex<LocalData>,
    evaluator: Arc<EntitlementEvaluator>,
}

impl LocalLibrary {
    /// Load the library at `path`; a missing or unreadable file starts empty
    pub fn open(path: impl Into<PathBuf>, evaluator: Arc<EntitlementEvaluator>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            match Self::load(&path) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "guest library unreadable, starting empty");
                    LocalData::default()
                }
            }
        } else {
            LocalData::default()
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
            evaluator,
        })
    }

    fn load(path: &Path) -> Result<LocalData> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn lock(&self) -> MutexGuard<'_, LocalData> {
        self.data
            .lock()
            .unwrap_or_else(|poisoned: PoisonError<MutexGuard<'_, LocalData>>| {
                warn!("guest library mutex was poisoned, recovering");
                poisoned.into_inner()
            })
    }

    /// Atomically write JSON to the library file
    fn atomic_write(&self, data: &LocalData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to temporary file first
        let temp_path = self.path.with_extension("tmp");
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        serde_json::to_writer_pretty(&mut writer, data)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        fs::rename(&temp_path, &self.path)?;
        debug!(path = %self.path.display(), "saved guest library");
        Ok(())
    }

    /// Persist `next`, then replace the in-memory state with it
    fn commit(&self, current: &mut LocalData, next: LocalData) -> Result<()> {
        self.atomic_write(&next)?;
        *current = next;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_favorite(&self, article_id: i64) -> Result<FavoriteOutcome> {
        let mut data = self.lock();
        if data.favorites.iter().any(|f| f.article_id == article_id) {
            return Ok(FavoriteOutcome::AlreadyFavorite);
        }

        let access = self
            .evaluator
            .can_add_favorite(None, data.favorites.len() as u32)?;
        if !access.is_allowed() {
            return Ok(FavoriteOutcome::Denied { access });
        }

        let mut next = data.clone();
        next.favorites.insert(
            0,
            LocalFavorite {
                article_id,
                added_at: Utc::now(),
            },
        );
        self.commit(&mut data, next)?;
        Ok(FavoriteOutcome::Added)
    }

    pub fn remove_favorite(&self, article_id: i64) -> Result<bool> {
        let mut data = self.lock();
        let mut next = data.clone();
        next.favorites.retain(|f| f.article_id != article_id);
        if next.favorites.len() == data.favorites.len() {
            return Ok(false);
        }
        self.commit(&mut data, next)?;
        Ok(true)
    }

    pub fn toggle_favorite(&self, article_id: i64) -> Result<FavoriteOutcome> {
        if self.remove_favorite(article_id)? {
            return Ok(FavoriteOutcome::Removed);
        }
        self.add_favorite(article_id)
    }

    pub fn is_favorite(&self, article_id: i64) -> bool {
        self.lock().favorites.iter().any(|f| f.article_id == article_id)
    }

    pub fn favorites(&self) -> Vec<LocalFavorite> {
        self.lock().favorites.clone()
    }

    pub fn clear_favorites(&self) -> Result<()> {
        let mut data = self.lock();
        let next = LocalData {
            favorites: Vec::new(),
            history: data.history.clone(),
        };
        self.commit(&mut data, next)
    }

    /// Move the article to the front of the history, evicting the oldest
    /// entries beyond the local cap
    pub fn record_view(&self, article_id: i64) -> Result<()> {
        let mut data = self.lock();
        let mut next = data.clone();
        next.history.retain(|h| h.article_id != article_id);
        next.history.insert(
            0,
            LocalHistoryEntry {
                article_id,
                viewed_at: Utc::now(),
            },
        );
        next.history.truncate(MAX_HISTORY_ENTRIES);
        self.commit(&mut data, next)
    }

    /// History within the free plan's retention window, newest first
    pub fn history(&self) -> Vec<LocalHistoryEntry> {
        let retention = self
            .evaluator
            .catalog()
            .limits_for(PlanTier::Free)
            .history_retention_days;
        let cutoff = retention_cutoff(retention, Utc::now());

        self.lock()
            .history
            .iter()
            .filter(|h| cutoff.map_or(true, |c| h.viewed_at >= c))
            .cloned()
            .collect()
    }

    pub fn remove_from_history(&self, article_id: i64) -> Result<bool> {
        let mut data = self.lock();
        let mut next = data.clone();
        next.history.retain(|h| h.article_id != article_id);
        if next.history.len() == data.history.len() {
            return Ok(false);
        }
        self.commit(&mut data, next)?;
        Ok(true)
    }

    pub fn clear_history(&self) -> Result<()> {
        let mut data = self.lock();
        let next = LocalData {
            favorites: data.favorites.clone(),
            history: Vec::new(),
        };
        self.commit(&mut data, next)
    }
}
