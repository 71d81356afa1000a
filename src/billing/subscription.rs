//! Plan lookup, local caching and plan changes
//!
//! The profile store is authoritative. The in-memory cache only serves
//! display paths (`cached_plan`); gating checks go through `current_plan`,
//! which always reads the store and refreshes the cache on the way.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{info, warn};

use super::types::PlanTier;
use crate::db::Database;
use crate::error::Result;

/// Helper to acquire read lock with poison recovery
fn acquire_read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned: PoisonError<RwLockReadGuard<'_, T>>| {
        warn!("RwLock was poisoned on read, recovering inner value");
        poisoned.into_inner()
    })
}

/// Helper to acquire write lock with poison recovery
fn acquire_write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned: PoisonError<RwLockWriteGuard<'_, T>>| {
        warn!("RwLock was poisoned on write, recovering inner value");
        poisoned.into_inner()
    })
}

/// Default cache TTL (5 minutes)
pub const DEFAULT_PLAN_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Durable user-profile collaborator
pub trait ProfileStore: Send + Sync {
    /// Tier stored for the user; `Free` when the user has no profile row
    fn plan_for(&self, user_id: &str) -> Result<PlanTier>;

    fn set_plan(&self, user_id: &str, tier: PlanTier) -> Result<()>;
}

/// Profiles table in the portal database
pub struct SqliteProfileStore {
    db: Arc<Database>,
}

impl SqliteProfileStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl ProfileStore for SqliteProfileStore {
    fn plan_for(&self, user_id: &str) -> Result<PlanTier> {
        let conn = self.db.conn();
        let plan_id: Option<String> = conn
            .query_row(
                "SELECT plan_id FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(plan_id
            .map(|id| PlanTier::from_plan_id(&id))
            .unwrap_or_default())
    }

    fn set_plan(&self, user_id: &str, tier: PlanTier) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            r#"
            INSERT INTO profiles (user_id, plan_id, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                plan_id = excluded.plan_id,
                updated_at = excluded.updated_at
            "#,
            params![user_id, tier.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Cached plan for one user
#[derive(Debug, Clone)]
pub struct CachedPlan {
    pub user_id: String,
    pub tier: PlanTier,
    pub cached_at: i64, // Unix timestamp in ms
}

/// Plan manager with local cache
pub struct SubscriptionManager {
    profiles: Arc<dyn ProfileStore>,
    cache: RwLock<HashMap<String, CachedPlan>>,
    ttl_ms: i64,
}

impl SubscriptionManager {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self::with_ttl(profiles, DEFAULT_PLAN_CACHE_TTL)
    }

    pub fn with_ttl(profiles: Arc<dyn ProfileStore>, ttl: Duration) -> Self {
        Self {
            profiles,
            cache: RwLock::new(HashMap::new()),
            ttl_ms: ttl.as_millis().min(i64::MAX as u128) as i64,
        }
    }

    /// Authoritative tier, read from the profile store
    pub fn current_plan(&self, user_id: &str) -> Result<PlanTier> {
        let tier = self.profiles.plan_for(user_id)?;
        self.update_cache(user_id, tier);
        Ok(tier)
    }

    /// Get cached plan, returning None if not cached or stale
    pub fn get_cached(&self, user_id: &str) -> Option<CachedPlan> {
        let cache = acquire_read_lock(&self.cache);
        if let Some(plan) = cache.get(user_id) {
            let age = Utc::now().timestamp_millis() - plan.cached_at;
            if age < self.ttl_ms {
                return Some(plan.clone());
            }
        }
        None
    }

    /// Tier for display: cache when fresh, otherwise the store
    pub fn cached_plan(&self, user_id: &str) -> Result<PlanTier> {
        match self.get_cached(user_id) {
            Some(plan) => Ok(plan.tier),
            None => self.current_plan(user_id),
        }
    }

    fn update_cache(&self, user_id: &str, tier: PlanTier) {
        let mut cache = acquire_write_lock(&self.cache);
        tracing::debug!(user_id = user_id, tier = %tier, "Caching plan");
        cache.insert(
            user_id.to_string(),
            CachedPlan {
                user_id: user_id.to_string(),
                tier,
                cached_at: Utc::now().timestamp_millis(),
            },
        );
    }

    /// Persist a plan switch and drop any cached entitlement state.
    ///
    /// Daily counters are not touched: a downgrade mid-day is evaluated
    /// against everything already consumed that day.
    pub fn apply_plan_change(&self, user_id: &str, new_tier: PlanTier) -> Result<()> {
        let previous = self.get_cached(user_id).map(|p| p.tier);
        self.profiles.set_plan(user_id, new_tier)?;
        self.invalidate(user_id);
        info!(
            user_id = user_id,
            from = ?previous,
            to = %new_tier,
            "Applied plan change"
        );
        Ok(())
    }

    /// Invalidate cache for a user (forces refresh on next access)
    pub fn invalidate(&self, user_id: &str) {
        let mut cache = acquire_write_lock(&self.cache);
        cache.remove(user_id);
        tracing::debug!(user_id = user_id, "Invalidated plan cache");
    }

    /// Drop every cached plan (on reconnect)
    pub fn clear_cache(&self) {
        acquire_write_lock(&self.cache).clear();
    }

    /// Check if user has a premium plan
    pub fn is_premium(&self, user_id: &str) -> Result<bool> {
        Ok(self.current_plan(user_id)?.is_premium())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (SubscriptionManager, Arc<SqliteProfileStore>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let profiles = Arc::new(SqliteProfileStore::new(db));
        (SubscriptionManager::new(profiles.clone()), profiles)
    }

    #[test]
    fn test_unknown_user_is_free() {
        let (manager, _) = manager();
        assert_eq!(manager.current_plan("nobody").unwrap(), PlanTier::Free);
        assert!(!manager.is_premium("nobody").unwrap());
    }

    #[test]
    fn test_plan_caching() {
        let (manager, profiles) = manager();
        let user_id = "test_user_123";

        // Initially no cache
        assert!(manager.get_cached(user_id).is_none());

        profiles.set_plan(user_id, PlanTier::PremiumMonthly).unwrap();
        assert_eq!(manager.cached_plan(user_id).unwrap(), PlanTier::PremiumMonthly);

        // Should be cached now
        let cached = manager.get_cached(user_id).unwrap();
        assert_eq!(cached.tier, PlanTier::PremiumMonthly);

        manager.invalidate(user_id);
        assert!(manager.get_cached(user_id).is_none());
    }

    #[test]
    fn test_plan_change_invalidates_stale_cache() {
        let (manager, profiles) = manager();
        profiles.set_plan("u1", PlanTier::Free).unwrap();
        assert_eq!(manager.cached_plan("u1").unwrap(), PlanTier::Free);

        manager.apply_plan_change("u1", PlanTier::PremiumAnnual).unwrap();
        assert!(manager.get_cached("u1").is_none());
        assert_eq!(manager.cached_plan("u1").unwrap(), PlanTier::PremiumAnnual);
        assert_eq!(profiles.plan_for("u1").unwrap(), PlanTier::PremiumAnnual);
    }

    #[test]
    fn test_current_plan_bypasses_cache() {
        let (manager, profiles) = manager();
        profiles.set_plan("u1", PlanTier::PremiumMonthly).unwrap();
        assert_eq!(manager.cached_plan("u1").unwrap(), PlanTier::PremiumMonthly);

        // Changed behind the manager's back, e.g. by another session
        profiles.set_plan("u1", PlanTier::Free).unwrap();
        assert_eq!(manager.cached_plan("u1").unwrap(), PlanTier::PremiumMonthly);
        assert_eq!(manager.current_plan("u1").unwrap(), PlanTier::Free);
    }

    #[test]
    fn test_zero_ttl_never_serves_cache() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let manager =
            SubscriptionManager::with_ttl(Arc::new(SqliteProfileStore::new(db)), Duration::ZERO);
        manager.current_plan("u1").unwrap();
        assert!(manager.get_cached("u1").is_none());
    }

    #[test]
    fn test_legacy_plan_ids_in_store() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.conn()
            .execute(
                "INSERT INTO profiles (user_id, plan_id, updated_at) VALUES ('u1', '3', '')",
                [],
            )
            .unwrap();
        let profiles = SqliteProfileStore::new(db);
        assert_eq!(profiles.plan_for("u1").unwrap(), PlanTier::PremiumAnnual);
    }
}
