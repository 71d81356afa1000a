//! Re-entrancy guard for summary generation
//!
//! Tracks (user, article) pairs with a generation in progress. Uses DashMap
//! for lock-free concurrent access; the entry is released when the ticket
//! drops, including when the request future is cancelled.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

type Key = (String, i64);

#[derive(Default)]
pub struct InFlightGuard {
    active: DashMap<Key, Instant>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the pair; `None` when a generation is already running for it
    pub fn try_begin(&self, user_id: &str, article_id: i64) -> Option<InFlightTicket<'_>> {
        let key = (user_id.to_string(), article_id);
        match self.active.entry(key.clone()) {
            Entry::Occupied(started) => {
                debug!(
                    user = user_id,
                    article_id,
                    running_ms = started.get().elapsed().as_millis() as u64,
                    "summary already being generated"
                );
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Some(InFlightTicket { guard: self, key })
            }
        }
    }

    pub fn is_active(&self, user_id: &str, article_id: i64) -> bool {
        self.active.contains_key(&(user_id.to_string(), article_id))
    }

    /// Age of the oldest running generation
    pub fn oldest(&self) -> Option<Duration> {
        self.active.iter().map(|e| e.value().elapsed()).max()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Releases its (user, article) pair on drop
pub struct InFlightTicket<'a> {
    guard: &'a InFlightGuard,
    key: Key,
}

impl Drop for InFlightTicket<'_> {
    fn drop(&mut self) {
        self.guard.active.remove(&self.key);
    }
}
