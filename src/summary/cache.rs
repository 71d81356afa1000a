//! Two-level summary cache
//!
//! Lookup order is the in-process map, then the durable store. Durable hits
//! are copied into the map. Records are immutable, so the map never needs
//! invalidation.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::store::{PutOutcome, SummaryRecord, SummaryStore};
use crate::error::Result;

pub struct SummaryCache {
    local: DashMap<i64, SummaryRecord>,
    store: Arc<dyn SummaryStore>,
}

impl SummaryCache {
    pub fn new(store: Arc<dyn SummaryStore>) -> Self {
        Self {
            local: DashMap::new(),
            store,
        }
    }

    /// Cached summary for an article, if any
    pub fn get(&self, article_id: i64) -> Result<Option<SummaryRecord>> {
        if let Some(record) = self.local.get(&article_id) {
            return Ok(Some(record.value().clone()));
        }

        let record = self.store.get(article_id)?;
        if let Some(record) = &record {
            debug!(article_id, "summary loaded from durable store");
            self.local.insert(article_id, record.clone());
        }
        Ok(record)
    }

    /// Store a summary unless one exists; returns the winning record
    pub fn put(&self, article_id: i64, content: &str, user_id: &str) -> Result<PutOutcome> {
        let outcome = self.store.insert_if_absent(article_id, content, user_id)?;
        self.local.insert(article_id, outcome.record.clone());
        Ok(outcome)
    }

    /// Entries held in memory
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Drop the in-memory copies; the durable store is untouched
    pub fn clear_local(&self) {
        self.local.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::summary::store::SqliteSummaryStore;

    fn cache_over(db: Arc<Database>) -> SummaryCache {
        SummaryCache::new(Arc::new(SqliteSummaryStore::new(db)))
    }

    #[test]
    fn test_durable_hit_populates_local() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        cache_over(db.clone()).put(1, "text", "alice").unwrap();

        // A fresh process sees the durable record
        let cache = cache_over(db);
        assert_eq!(cache.local_len(), 0);
        assert_eq!(cache.get(1).unwrap().unwrap().content, "text");
        assert_eq!(cache.local_len(), 1);
    }

    #[test]
    fn test_put_returns_winner_to_late_writer() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let session_a = cache_over(db.clone());
        let session_b = cache_over(db);

        session_a.put(9, "from a", "alice").unwrap();
        let late = session_b.put(9, "from b", "bob").unwrap();
        assert!(!late.inserted);
        assert_eq!(late.record.content, "from a");
        assert_eq!(session_b.get(9).unwrap().unwrap().content, "from a");
    }

    #[test]
    fn test_concurrent_puts_converge() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = Arc::new(cache_over(db));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache
                        .put(5, &format!("summary {}", i), &format!("user{}", i))
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<PutOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| o.inserted).count(), 1);

        let stored = cache.get(5).unwrap().unwrap();
        assert!(outcomes.iter().all(|o| o.record == stored));
    }
}
