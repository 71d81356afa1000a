//! Fixed table of plan limits

use once_cell::sync::Lazy;

use super::types::{Limit, PlanLimits, PlanTier};

static GLOBAL_CATALOG: Lazy<PlanCatalog> = Lazy::new(PlanCatalog::standard);

/// Immutable mapping from tier to limits, built once at startup
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    free: PlanLimits,
    premium_monthly: PlanLimits,
    premium_annual: PlanLimits,
}

impl PlanCatalog {
    /// The portal's published plans
    pub fn standard() -> Self {
        Self {
            free: PlanLimits {
                max_sources: Limit::Finite(2),
                max_articles_per_day: Limit::Finite(30),
                history_retention_days: Limit::Finite(7),
                max_ai_summaries_per_day: Limit::Finite(3),
                max_favorites: Limit::Finite(10),
                export_enabled: false,
                advanced_filters_enabled: false,
                priority_support: false,
                ad_free: false,
                early_access: false,
            },
            premium_monthly: PlanLimits {
                max_sources: Limit::Finite(20),
                max_articles_per_day: Limit::Finite(500),
                history_retention_days: Limit::Finite(90),
                max_ai_summaries_per_day: Limit::Unlimited,
                max_favorites: Limit::Unlimited,
                export_enabled: true,
                advanced_filters_enabled: true,
                priority_support: true,
                ad_free: true,
                early_access: false,
            },
            premium_annual: PlanLimits {
                max_sources: Limit::Unlimited,
                max_articles_per_day: Limit::Unlimited,
                history_retention_days: Limit::Unlimited,
                max_ai_summaries_per_day: Limit::Unlimited,
                max_favorites: Limit::Unlimited,
                export_enabled: true,
                advanced_filters_enabled: true,
                priority_support: true,
                ad_free: true,
                early_access: true,
            },
        }
    }

    /// Process-wide catalog
    pub fn global() -> &'static PlanCatalog {
        &GLOBAL_CATALOG
    }

    /// Limits for a tier
    pub fn limits_for(&self, tier: PlanTier) -> &PlanLimits {
        match tier {
            PlanTier::Free => &self.free,
            PlanTier::PremiumMonthly => &self.premium_monthly,
            PlanTier::PremiumAnnual => &self.premium_annual,
        }
    }

    /// Limits for a raw backend plan id; unknown ids resolve to the free plan
    pub fn limits_for_id(&self, plan_id: &str) -> &PlanLimits {
        self.limits_for(PlanTier::from_plan_id(plan_id))
    }

    /// Tiers, in catalog order, whose limits satisfy `predicate`
    pub fn tiers_where<F>(&self, predicate: F) -> Vec<PlanTier>
    where
        F: Fn(&PlanLimits) -> bool,
    {
        PlanTier::ALL
            .into_iter()
            .filter(|tier| predicate(self.limits_for(*tier)))
            .collect()
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
