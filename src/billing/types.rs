//! Billing data types

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Subscription tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanTier {
    #[default]
    Free,
    PremiumMonthly,
    PremiumAnnual,
}

impl PlanTier {
    pub const ALL: [PlanTier; 3] = [Self::Free, Self::PremiumMonthly, Self::PremiumAnnual];

    /// Canonical identifier stored in the profile table
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::PremiumMonthly => "premium-monthly",
            Self::PremiumAnnual => "premium-annual",
        }
    }

    /// Human readable name used in upgrade messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::PremiumMonthly => "Premium Monthly",
            Self::PremiumAnnual => "Premium Annual",
        }
    }

    /// Parse a plan identifier coming from the backend.
    ///
    /// Accepts canonical ids, the legacy Spanish ids and the numeric plan ids
    /// (1 = free, 2 = monthly, 3 = annual). Unknown ids fall back to `Free`.
    pub fn from_plan_id(id: &str) -> Self {
        match id.trim().to_ascii_lowercase().as_str() {
            "free" | "gratis" | "1" => Self::Free,
            "premium-monthly" | "premium-mensual" | "2" => Self::PremiumMonthly,
            "premium-annual" | "premium-anual" | "3" => Self::PremiumAnnual,
            other => {
                warn!(plan_id = other, "unrecognized plan id, treating as free");
                Self::Free
            }
        }
    }

    pub fn is_premium(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A numeric plan limit. Serialized as an integer, `-1` meaning unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Limit {
    Unlimited,
    Finite(u32),
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Whether one more unit may be consumed when `used` are already consumed
    pub fn permits(&self, used: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Finite(max) => used < *max,
        }
    }

    /// Units left after `used`; unlimited stays unlimited
    pub fn remaining(&self, used: u32) -> Limit {
        match self {
            Self::Unlimited => Self::Unlimited,
            Self::Finite(max) => Self::Finite(max.saturating_sub(used)),
        }
    }

    pub fn finite(&self) -> Option<u32> {
        match self {
            Self::Unlimited => None,
            Self::Finite(max) => Some(*max),
        }
    }
}

impl From<i64> for Limit {
    fn from(value: i64) -> Self {
        if value < 0 {
            Self::Unlimited
        } else {
            Self::Finite(value.min(u32::MAX as i64) as u32)
        }
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Unlimited => -1,
            Limit::Finite(max) => max as i64,
        }
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Finite(max) => write!(f, "{}", max),
        }
    }
}

/// Per-tier limits and feature flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    pub max_sources: Limit,
    pub max_articles_per_day: Limit,
    pub history_retention_days: Limit,
    pub max_ai_summaries_per_day: Limit,
    pub max_favorites: Limit,
    pub export_enabled: bool,
    pub advanced_filters_enabled: bool,
    pub priority_support: bool,
    pub ad_free: bool,
    pub early_access: bool,
}

/// Quota-limited features tracked by the usage counter store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageFeature {
    Summary,
}

impl UsageFeature {
    /// Key stored in the counter table
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
        }
    }
}

/// Boolean plan features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanFeature {
    Export,
    AdvancedFilters,
    PrioritySupport,
    AdFree,
    EarlyAccess,
}

impl PlanFeature {
    pub fn is_enabled(&self, limits: &PlanLimits) -> bool {
        match self {
            Self::Export => limits.export_enabled,
            Self::AdvancedFilters => limits.advanced_filters_enabled,
            Self::PrioritySupport => limits.priority_support,
            Self::AdFree => limits.ad_free,
            Self::EarlyAccess => limits.early_access,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Export => "Export",
            Self::AdvancedFilters => "Advanced filters",
            Self::PrioritySupport => "Priority support",
            Self::AdFree => "Ad-free reading",
            Self::EarlyAccess => "Early access",
        }
    }
}

/// Reason for denying a gated action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum DenialReason {
    #[serde(rename = "notAuthenticated")]
    NotAuthenticated,
    #[serde(rename = "summaryLimitReached")]
    SummaryLimitReached {
        limit: u32,
        used: u32,
        upgrade_tiers: Vec<PlanTier>,
    },
    #[serde(rename = "favoritesLimitReached")]
    FavoritesLimitReached {
        limit: u32,
        current: u32,
        upgrade_tiers: Vec<PlanTier>,
    },
    #[serde(rename = "featureNotIncluded")]
    FeatureNotIncluded {
        feature: PlanFeature,
        upgrade_tiers: Vec<PlanTier>,
    },
}

impl DenialReason {
    /// Tiers that would lift this denial
    pub fn upgrade_tiers(&self) -> &[PlanTier] {
        match self {
            Self::NotAuthenticated => &[],
            Self::SummaryLimitReached { upgrade_tiers, .. }
            | Self::FavoritesLimitReached { upgrade_tiers, .. }
            | Self::FeatureNotIncluded { upgrade_tiers, .. } => upgrade_tiers,
        }
    }
}

fn tier_list(tiers: &[PlanTier]) -> String {
    let names: Vec<&str> = tiers.iter().map(|t| t.display_name()).collect();
    match names.len() {
        0 => "a higher plan".to_string(),
        1 => names[0].to_string(),
        n => format!("{} or {}", names[..n - 1].join(", "), names[n - 1]),
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAuthenticated => {
                write!(f, "Sign in to use this feature")
            }
            Self::SummaryLimitReached {
                limit,
                used,
                upgrade_tiers,
            } => {
                write!(
                    f,
                    "You have reached the limit of {} AI summaries per day ({}/{} used). Upgrade to {} for unlimited summaries.",
                    limit,
                    used,
                    limit,
                    tier_list(upgrade_tiers)
                )
            }
            Self::FavoritesLimitReached {
                limit,
                upgrade_tiers,
                ..
            } => {
                write!(
                    f,
                    "You have reached the limit of {} favorites. Upgrade to {} for unlimited favorites.",
                    limit,
                    tier_list(upgrade_tiers)
                )
            }
            Self::FeatureNotIncluded {
                feature,
                upgrade_tiers,
            } => {
                write!(
                    f,
                    "{} is not included in your plan. Upgrade to {} to unlock it.",
                    feature.display_name(),
                    tier_list(upgrade_tiers)
                )
            }
        }
    }
}

/// Result of every gating check. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureAccessResult {
    pub permitted: bool,
    pub reason: Option<String>,
    pub required_tiers: Vec<PlanTier>,
    pub denial: Option<DenialReason>,
}

impl FeatureAccessResult {
    pub fn allowed() -> Self {
        Self {
            permitted: true,
            reason: None,
            required_tiers: Vec::new(),
            denial: None,
        }
    }

    pub fn denied(reason: DenialReason) -> Self {
        Self {
            permitted: false,
            reason: Some(reason.to_string()),
            required_tiers: reason.upgrade_tiers().to_vec(),
            denial: Some(reason),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.permitted
    }

    pub fn denial_reason(&self) -> Option<&DenialReason> {
        self.denial.as_ref()
    }
}

/// Outcome of charging one generated summary against the daily quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum SummaryCharge {
    /// Counter incremented; `used` is the new count for today
    #[serde(rename = "recorded")]
    Recorded { used: u32 },
    /// Another session consumed the last unit first; nothing was incremented
    #[serde(rename = "limitReached")]
    LimitReached { limit: u32 },
}

/// Plan and usage for one user, for display
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementSnapshot {
    pub user_id: String,
    pub tier: PlanTier,
    pub limits: PlanLimits,
    pub day: String,
    pub daily_summary_count: u32,
    pub summaries_remaining: Limit,
    pub favorites_count: u32,
    pub favorites_remaining: Limit,
}
