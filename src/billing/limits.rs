//! Entitlement evaluation
//!
//! Answers "may this user do X now" from the plan catalog, the user's tier and
//! today's usage. Checks are side-effect free; the only write is
//! [`EntitlementEvaluator::record_summary_generated`].

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::catalog::PlanCatalog;
use super::clock::{day_key, DayClock};
use super::subscription::SubscriptionManager;
use super::types::{
    DenialReason, EntitlementSnapshot, FeatureAccessResult, Limit, PlanFeature, PlanTier,
    SummaryCharge, UsageFeature,
};
use super::usage::UsageCounterStore;
use crate::error::Result;

/// Usage share (percent) at which a limit counts as nearly reached
pub const NEAR_LIMIT_PERCENT: u8 = 80;

/// Entitlement evaluation service
pub struct EntitlementEvaluator {
    catalog: &'static PlanCatalog,
    subscriptions: Arc<SubscriptionManager>,
    usage: Arc<dyn UsageCounterStore>,
    clock: Arc<dyn DayClock>,
}

impl EntitlementEvaluator {
    pub fn new(
        subscriptions: Arc<SubscriptionManager>,
        usage: Arc<dyn UsageCounterStore>,
        clock: Arc<dyn DayClock>,
    ) -> Self {
        Self {
            catalog: PlanCatalog::global(),
            subscriptions,
            usage,
            clock,
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        self.catalog
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Tier for gating; anonymous users are evaluated as free
    pub fn tier_for(&self, user_id: Option<&str>) -> Result<PlanTier> {
        match user_id {
            Some(id) => self.subscriptions.current_plan(id),
            None => Ok(PlanTier::Free),
        }
    }

    /// Summaries generated by the user today
    pub fn summaries_used_today(&self, user_id: &str) -> Result<u32> {
        self.usage
            .current_count(user_id, UsageFeature::Summary, self.today())
    }

    /// Check whether the user may generate one more AI summary today
    pub fn can_generate_summary(&self, user_id: Option<&str>) -> Result<FeatureAccessResult> {
        let Some(user_id) = user_id else {
            return Ok(FeatureAccessResult::denied(DenialReason::NotAuthenticated));
        };

        let tier = self.subscriptions.current_plan(user_id)?;
        let limit = self.catalog.limits_for(tier).max_ai_summaries_per_day;
        if limit.is_unlimited() {
            return Ok(FeatureAccessResult::allowed());
        }

        let used = self.summaries_used_today(user_id)?;
        if limit.permits(used) {
            return Ok(FeatureAccessResult::allowed());
        }

        debug!(user = user_id, tier = %tier, used, limit = %limit, "summary quota exhausted");
        Ok(FeatureAccessResult::denied(DenialReason::SummaryLimitReached {
            limit: limit.finite().unwrap_or_default(),
            used,
            upgrade_tiers: self
                .catalog
                .tiers_where(|l| l.max_ai_summaries_per_day.permits(used)),
        }))
    }

    /// Check whether the user may keep one more favorite
    pub fn can_add_favorite(
        &self,
        user_id: Option<&str>,
        current_favorites: u32,
    ) -> Result<FeatureAccessResult> {
        let limit = self.favorite_limit(user_id)?;
        Ok(self.favorite_access(limit, current_favorites))
    }

    /// The favorites cap of the user's plan; guests get the free cap
    pub fn favorite_limit(&self, user_id: Option<&str>) -> Result<Limit> {
        let tier = self.tier_for(user_id)?;
        Ok(self.catalog.limits_for(tier).max_favorites)
    }

    /// Allow or deny one more favorite against an already resolved cap
    pub fn favorite_access(&self, limit: Limit, current_favorites: u32) -> FeatureAccessResult {
        if limit.permits(current_favorites) {
            return FeatureAccessResult::allowed();
        }

        FeatureAccessResult::denied(DenialReason::FavoritesLimitReached {
            limit: limit.finite().unwrap_or_default(),
            current: current_favorites,
            upgrade_tiers: self
                .catalog
                .tiers_where(|l| l.max_favorites.permits(current_favorites)),
        })
    }

    /// Check a boolean plan feature such as export or advanced filters
    pub fn can_use_feature(
        &self,
        user_id: Option<&str>,
        feature: PlanFeature,
    ) -> Result<FeatureAccessResult> {
        let tier = self.tier_for(user_id)?;
        if feature.is_enabled(self.catalog.limits_for(tier)) {
            return Ok(FeatureAccessResult::allowed());
        }

        Ok(FeatureAccessResult::denied(DenialReason::FeatureNotIncluded {
            feature,
            upgrade_tiers: self.catalog.tiers_where(|l| feature.is_enabled(l)),
        }))
    }

    /// Charge one newly generated summary to today's counter.
    ///
    /// Must be called exactly once per generated summary and never for cache
    /// hits. On finite tiers the increment is conditional, so two sessions
    /// racing for the last unit cannot both be charged.
    pub fn record_summary_generated(&self, user_id: &str) -> Result<SummaryCharge> {
        let tier = self.subscriptions.current_plan(user_id)?;
        let today = self.today();

        match self.catalog.limits_for(tier).max_ai_summaries_per_day {
            Limit::Unlimited => {
                let used = self
                    .usage
                    .increment_and_get(user_id, UsageFeature::Summary, today)?;
                Ok(SummaryCharge::Recorded { used })
            }
            Limit::Finite(limit) => {
                match self
                    .usage
                    .increment_if_below(user_id, UsageFeature::Summary, today, limit)?
                {
                    Some(used) => Ok(SummaryCharge::Recorded { used }),
                    None => {
                        warn!(
                            user = user_id,
                            limit,
                            day = %day_key(today),
                            "summary quota consumed by a concurrent session"
                        );
                        Ok(SummaryCharge::LimitReached { limit })
                    }
                }
            }
        }
    }

    /// Summaries left today
    pub fn remaining_summaries(&self, user_id: &str) -> Result<Limit> {
        let tier = self.subscriptions.current_plan(user_id)?;
        let limit = self.catalog.limits_for(tier).max_ai_summaries_per_day;
        if limit.is_unlimited() {
            return Ok(Limit::Unlimited);
        }
        Ok(limit.remaining(self.summaries_used_today(user_id)?))
    }

    /// Plan, limits and usage for display
    pub fn snapshot(&self, user_id: &str, favorites_count: u32) -> Result<EntitlementSnapshot> {
        let tier = self.subscriptions.cached_plan(user_id)?;
        let limits = self.catalog.limits_for(tier).clone();
        let used = self.summaries_used_today(user_id)?;

        Ok(EntitlementSnapshot {
            user_id: user_id.to_string(),
            tier,
            day: day_key(self.today()),
            daily_summary_count: used,
            summaries_remaining: limits.max_ai_summaries_per_day.remaining(used),
            favorites_count,
            favorites_remaining: limits.max_favorites.remaining(favorites_count),
            limits,
        })
    }

    /// Percentage of a limit already used, capped at 100; 0 for unlimited
    pub fn usage_percent(used: u32, limit: Limit) -> u8 {
        match limit {
            Limit::Unlimited => 0,
            Limit::Finite(0) => 100,
            Limit::Finite(max) => ((used as u64 * 100) / max as u64).min(100) as u8,
        }
    }

    pub fn is_near_limit(used: u32, limit: Limit) -> bool {
        Self::usage_percent(used, limit) >= NEAR_LIMIT_PERCENT
    }

    /// Upgrade pitch for a feature, tailored to the current tier
    pub fn upgrade_message(tier: PlanTier, feature: &str) -> String {
        match tier {
            PlanTier::Free => {
                format!("Upgrade to Premium to unlock {} and much more.", feature)
            }
            PlanTier::PremiumMonthly => format!(
                "Upgrade to Premium Annual for full access to {} and save $39.89 a year.",
                feature
            ),
            PlanTier::PremiumAnnual => "You already have full access to every feature!".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::clock::ManualClock;
    use crate::billing::subscription::{ProfileStore, SqliteProfileStore};
    use crate::billing::usage::SqliteUsageStore;
    use crate::db::Database;

    struct Fixture {
        evaluator: EntitlementEvaluator,
        profiles: Arc<SqliteProfileStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let profiles = Arc::new(SqliteProfileStore::new(db.clone()));
        let clock = Arc::new(ManualClock::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        let evaluator = EntitlementEvaluator::new(
            Arc::new(SubscriptionManager::new(profiles.clone())),
            Arc::new(SqliteUsageStore::new(db)),
            clock.clone(),
        );
        Fixture {
            evaluator,
            profiles,
            clock,
        }
    }

    #[test]
    fn test_anonymous_summary_denied() {
        let f = fixture();
        let result = f.evaluator.can_generate_summary(None).unwrap();
        assert!(!result.is_allowed());
        assert_eq!(result.denial_reason(), Some(&DenialReason::NotAuthenticated));
    }

    #[test]
    fn test_free_tier_summary_allowed_until_limit() {
        let f = fixture();
        for _ in 0..3 {
            assert!(f.evaluator.can_generate_summary(Some("u1")).unwrap().is_allowed());
            assert!(matches!(
                f.evaluator.record_summary_generated("u1").unwrap(),
                SummaryCharge::Recorded { .. }
            ));
        }

        let result = f.evaluator.can_generate_summary(Some("u1")).unwrap();
        assert!(!result.is_allowed());
        assert!(result.reason.as_deref().unwrap().contains('3'));
        assert_eq!(
            result.required_tiers,
            vec![PlanTier::PremiumMonthly, PlanTier::PremiumAnnual]
        );
        assert_eq!(f.evaluator.remaining_summaries("u1").unwrap(), Limit::Finite(0));
    }

    #[test]
    fn test_check_does_not_increment() {
        let f = fixture();
        for _ in 0..10 {
            f.evaluator.can_generate_summary(Some("u1")).unwrap();
        }
        assert_eq!(f.evaluator.summaries_used_today("u1").unwrap(), 0);
    }

    #[test]
    fn test_record_at_limit_reports_limit_reached() {
        let f = fixture();
        for _ in 0..3 {
            f.evaluator.record_summary_generated("u1").unwrap();
        }
        assert_eq!(
            f.evaluator.record_summary_generated("u1").unwrap(),
            SummaryCharge::LimitReached { limit: 3 }
        );
        assert_eq!(f.evaluator.summaries_used_today("u1").unwrap(), 3);
    }

    #[test]
    fn test_premium_unlimited_regardless_of_count() {
        let f = fixture();
        f.profiles.set_plan("u1", PlanTier::PremiumMonthly).unwrap();
        for _ in 0..25 {
            f.evaluator.record_summary_generated("u1").unwrap();
        }
        assert!(f.evaluator.can_generate_summary(Some("u1")).unwrap().is_allowed());
        assert!(f.evaluator.can_add_favorite(Some("u1"), 10_000).unwrap().is_allowed());
        assert_eq!(f.evaluator.remaining_summaries("u1").unwrap(), Limit::Unlimited);
    }

    #[test]
    fn test_day_rollover_restores_quota() {
        let f = fixture();
        for _ in 0..3 {
            f.evaluator.record_summary_generated("u1").unwrap();
        }
        assert!(!f.evaluator.can_generate_summary(Some("u1")).unwrap().is_allowed());

        f.clock.advance_days(1);
        assert_eq!(f.evaluator.summaries_used_today("u1").unwrap(), 0);
        assert!(f.evaluator.can_generate_summary(Some("u1")).unwrap().is_allowed());
    }

    #[test]
    fn test_downgrade_keeps_todays_count() {
        let f = fixture();
        let subs = f.evaluator.subscriptions().clone();
        f.evaluator.record_summary_generated("u1").unwrap();
        f.evaluator.record_summary_generated("u1").unwrap();

        subs.apply_plan_change("u1", PlanTier::PremiumAnnual).unwrap();
        subs.apply_plan_change("u1", PlanTier::Free).unwrap();

        assert_eq!(f.evaluator.summaries_used_today("u1").unwrap(), 2);
        assert_eq!(f.evaluator.remaining_summaries("u1").unwrap(), Limit::Finite(1));
    }

    #[test]
    fn test_favorites_limit_for_free_and_guests() {
        let f = fixture();
        assert!(f.evaluator.can_add_favorite(Some("u1"), 9).unwrap().is_allowed());

        let result = f.evaluator.can_add_favorite(Some("u1"), 10).unwrap();
        assert!(!result.is_allowed());
        assert!(result.reason.as_deref().unwrap().contains("10 favorites"));

        assert!(!f.evaluator.can_add_favorite(None, 10).unwrap().is_allowed());
    }

    #[test]
    fn test_feature_flags() {
        let f = fixture();
        let result = f
            .evaluator
            .can_use_feature(Some("u1"), PlanFeature::AdvancedFilters)
            .unwrap();
        assert!(!result.is_allowed());
        assert_eq!(
            result.required_tiers,
            vec![PlanTier::PremiumMonthly, PlanTier::PremiumAnnual]
        );

        f.profiles.set_plan("u1", PlanTier::PremiumMonthly).unwrap();
        assert!(f
            .evaluator
            .can_use_feature(Some("u1"), PlanFeature::AdvancedFilters)
            .unwrap()
            .is_allowed());

        let early = f
            .evaluator
            .can_use_feature(Some("u1"), PlanFeature::EarlyAccess)
            .unwrap();
        assert_eq!(early.required_tiers, vec![PlanTier::PremiumAnnual]);
    }

    #[test]
    fn test_snapshot() {
        let f = fixture();
        f.evaluator.record_summary_generated("u1").unwrap();
        let snapshot = f.evaluator.snapshot("u1", 4).unwrap();
        assert_eq!(snapshot.tier, PlanTier::Free);
        assert_eq!(snapshot.day, "2025-01-01");
        assert_eq!(snapshot.daily_summary_count, 1);
        assert_eq!(snapshot.summaries_remaining, Limit::Finite(2));
        assert_eq!(snapshot.favorites_remaining, Limit::Finite(6));
    }

    #[test]
    fn test_usage_percent_and_near_limit() {
        assert_eq!(EntitlementEvaluator::usage_percent(8, Limit::Finite(10)), 80);
        assert_eq!(EntitlementEvaluator::usage_percent(30, Limit::Finite(10)), 100);
        assert_eq!(EntitlementEvaluator::usage_percent(500, Limit::Unlimited), 0);
        assert!(EntitlementEvaluator::is_near_limit(8, Limit::Finite(10)));
        assert!(!EntitlementEvaluator::is_near_limit(7, Limit::Finite(10)));
    }

    #[test]
    fn test_upgrade_message_by_tier() {
        assert!(EntitlementEvaluator::upgrade_message(PlanTier::Free, "export").contains("Premium"));
        assert!(
            EntitlementEvaluator::upgrade_message(PlanTier::PremiumMonthly, "export")
                .contains("Premium Annual")
        );
        assert!(
            EntitlementEvaluator::upgrade_message(PlanTier::PremiumAnnual, "export")
                .contains("already")
        );
    }
}
