//! Generate-or-fetch for article summaries
//!
//! ```text
//! requested -> cache hit                  -> served (no cost)
//!           -> miss -> quota check denied -> denied
//!           -> miss -> allowed -> generate -> failed (quota untouched)
//!                                         -> charge + store -> served
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use super::cache::SummaryCache;
use super::inflight::InFlightGuard;
use super::store::SummaryRecord;
use crate::ai::prompts::build_summary_prompt;
use crate::ai::TextGenerator;
use crate::articles::Article;
use crate::billing::{DenialReason, EntitlementEvaluator, FeatureAccessResult, SummaryCharge};
use crate::error::{PortalError, Result};

/// How a summary request ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SummaryOutcome {
    /// Existing summary; no generation, no quota consumed
    ServedFromCache { record: SummaryRecord },
    /// Newly generated and charged; `used_today` is the user's count after the charge
    Generated {
        record: SummaryRecord,
        used_today: u32,
    },
    Denied { access: FeatureAccessResult },
    /// The same user already has a generation running for this article
    InProgress,
}

impl SummaryOutcome {
    pub fn record(&self) -> Option<&SummaryRecord> {
        match self {
            Self::ServedFromCache { record } | Self::Generated { record, .. } => Some(record),
            _ => None,
        }
    }
}

pub struct SummaryService {
    cache: Arc<SummaryCache>,
    evaluator: Arc<EntitlementEvaluator>,
    generator: Arc<dyn TextGenerator>,
    in_flight: InFlightGuard,
}

impl SummaryService {
    pub fn new(
        cache: Arc<SummaryCache>,
        evaluator: Arc<EntitlementEvaluator>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            cache,
            evaluator,
            generator,
            in_flight: InFlightGuard::new(),
        }
    }

    /// Read-only lookup; never generates and never needs a user
    pub fn get_summary(&self, article_id: i64) -> Result<Option<SummaryRecord>> {
        self.cache.get(article_id)
    }

    /// Serve a cached summary or generate one within the user's quota.
    ///
    /// Generation failures return `Err` without touching the quota. When another
    /// user's generation of the same article is stored first, this one is still
    /// charged and the stored record is returned. Once the
    /// generator has answered, the charge and the store run without further
    /// suspension points, so a dropped future cannot leave a charge without
    /// its record being attempted.
    pub async fn summarize(&self, user_id: Option<&str>, article: &Article) -> Result<SummaryOutcome> {
        if let Some(record) = self.cache.get(article.id)? {
            return Ok(SummaryOutcome::ServedFromCache { record });
        }

        let access = self.evaluator.can_generate_summary(user_id)?;
        let user_id = match user_id {
            Some(id) if access.is_allowed() => id,
            _ => return Ok(SummaryOutcome::Denied { access }),
        };

        let Some(_ticket) = self.in_flight.try_begin(user_id, article.id) else {
            return Ok(SummaryOutcome::InProgress);
        };

        // Another user may have finished this article while we were checking
        if let Some(record) = self.cache.get(article.id)? {
            return Ok(SummaryOutcome::ServedFromCache { record });
        }

        let prompt = build_summary_prompt(&article.title, &article.body);
        let text = self.generator.generate(&prompt, None).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(PortalError::GenerationFailed("empty summary".to_string()));
        }

        let used_today = match self.evaluator.record_summary_generated(user_id)? {
            SummaryCharge::Recorded { used } => used,
            SummaryCharge::LimitReached { limit } => {
                let upgrade_tiers = self
                    .evaluator
                    .catalog()
                    .tiers_where(|l| l.max_ai_summaries_per_day.permits(limit));
                return Ok(SummaryOutcome::Denied {
                    access: FeatureAccessResult::denied(DenialReason::SummaryLimitReached {
                        limit,
                        used: limit,
                        upgrade_tiers,
                    }),
                });
            }
        };

        let outcome = self.cache.put(article.id, text, user_id).map_err(|e| {
            error!(
                user = user_id,
                article_id = article.id,
                error = %e,
                "summary charged but could not be stored"
            );
            e
        })?;

        if outcome.inserted {
            info!(user = user_id, article_id = article.id, used_today, "summary generated");
        } else {
            warn!(
                user = user_id,
                article_id = article.id,
                used_today,
                "summary stored by a concurrent session; this generation was charged but discarded"
            );
        }

        Ok(SummaryOutcome::Generated {
            record: outcome.record,
            used_today,
        })
    }
}
