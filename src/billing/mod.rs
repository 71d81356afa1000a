//! Billing module for plan entitlements and usage quotas
//!
//! This module handles:
//! - The fixed plan catalog (Free / Premium Monthly / Premium Annual)
//! - Daily usage counters per user and feature
//! - Entitlement checks before summaries, favorites and premium features
//! - Plan changes with local cache invalidation

mod catalog;
mod clock;
mod limits;
mod subscription;
mod types;
mod usage;

pub use catalog::PlanCatalog;
pub use clock::{day_key, DayClock, LocalClock, ManualClock};
pub use limits::{EntitlementEvaluator, NEAR_LIMIT_PERCENT};
pub use subscription::{
    CachedPlan, ProfileStore, SqliteProfileStore, SubscriptionManager, DEFAULT_PLAN_CACHE_TTL,
};
pub use types::{
    DenialReason, EntitlementSnapshot, FeatureAccessResult, Limit, PlanFeature, PlanLimits,
    PlanTier, SummaryCharge, UsageFeature,
};
pub use usage::{DailyCount, SqliteUsageStore, UsageCounterStore};

use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;

/// Billing services sharing one database
pub struct BillingState {
    pub usage: Arc<dyn UsageCounterStore>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub evaluator: Arc<EntitlementEvaluator>,
}

impl BillingState {
    /// Create billing state over the portal database
    pub fn new(db: Arc<Database>, clock: Arc<dyn DayClock>, plan_cache_ttl: Duration) -> Self {
        let usage: Arc<dyn UsageCounterStore> = Arc::new(SqliteUsageStore::new(db.clone()));
        let profiles = Arc::new(SqliteProfileStore::new(db));
        let subscriptions = Arc::new(SubscriptionManager::with_ttl(profiles, plan_cache_ttl));
        let evaluator = Arc::new(EntitlementEvaluator::new(
            subscriptions.clone(),
            usage.clone(),
            clock,
        ));

        Self {
            usage,
            subscriptions,
            evaluator,
        }
    }
}
