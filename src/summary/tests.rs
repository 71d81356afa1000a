//! Summary module tests
//!
//! End-to-end generate-or-fetch scenarios over an in-memory database:
//! - Daily quota on the free plan and cache hits at no cost
//! - Failures that must not consume quota or leave records behind
//! - Plan changes, day rollover and concurrent sessions

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tokio::sync::Notify;

    use crate::ai::{GenerationConfig, TextGenerator};
    use crate::articles::Article;
    use crate::billing::{
        BillingState, DailyCount, DayClock, DenialReason, EntitlementEvaluator, ManualClock, PlanTier,
        SqliteProfileStore, SubscriptionManager, UsageCounterStore, UsageFeature,
    };
    use crate::db::Database;
    use crate::error::{PortalError, Result};
    use crate::summary::{SqliteSummaryStore, SummaryCache, SummaryOutcome, SummaryService};

    struct MockGenerator {
        calls: AtomicUsize,
        fail: bool,
        gate: Option<Arc<Notify>>,
    }

    impl MockGenerator {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                gate: None,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok()
            }
        }

        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::ok()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for MockGenerator {
        async fn generate(&self, prompt: &str, _config: Option<GenerationConfig>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(PortalError::GenerationFailed("upstream returned 503".to_string()));
            }
            let title = prompt
                .lines()
                .find_map(|l| l.strip_prefix("Title: "))
                .unwrap_or_default();
            Ok(format!("Summary of {}", title))
        }
    }

    /// Usage store whose writes always fail
    struct BrokenUsageStore;

    impl UsageCounterStore for BrokenUsageStore {
        fn current_count(&self, _: &str, _: UsageFeature, _: NaiveDate) -> Result<u32> {
            Ok(0)
        }

        fn increment_and_get(&self, _: &str, _: UsageFeature, _: NaiveDate) -> Result<u32> {
            Err(PortalError::PersistenceFailed(rusqlite::Error::InvalidQuery))
        }

        fn increment_if_below(
            &self,
            _: &str,
            _: UsageFeature,
            _: NaiveDate,
            _: u32,
        ) -> Result<Option<u32>> {
            Err(PortalError::PersistenceFailed(rusqlite::Error::InvalidQuery))
        }

        fn history(&self, _: &str, _: UsageFeature, _: NaiveDate) -> Result<Vec<DailyCount>> {
            Ok(Vec::new())
        }

        fn purge_before(&self, _: NaiveDate) -> Result<usize> {
            Ok(0)
        }
    }

    struct Harness {
        service: Arc<SummaryService>,
        billing: BillingState,
        clock: Arc<ManualClock>,
        generator: Arc<MockGenerator>,
    }

    impl Harness {
        fn new(generator: MockGenerator) -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let clock = Arc::new(ManualClock::new(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()));
            let billing = BillingState::new(db.clone(), clock.clone(), Duration::from_secs(300));
            let generator = Arc::new(generator);
            let cache = Arc::new(SummaryCache::new(Arc::new(SqliteSummaryStore::new(db))));
            let service = Arc::new(SummaryService::new(
                cache,
                billing.evaluator.clone(),
                generator.clone(),
            ));

            Self {
                service,
                billing,
                clock,
                generator,
            }
        }

        fn used(&self, user_id: &str) -> u32 {
            self.billing.evaluator.summaries_used_today(user_id).unwrap()
        }

        async fn summarize(&self, user_id: Option<&str>, article_id: i64) -> SummaryOutcome {
            self.service
                .summarize(user_id, &article(article_id))
                .await
                .unwrap()
        }
    }

    fn article(id: i64) -> Article {
        Article {
            body: format!("Body of article {}", id),
            ..Article::new(id, format!("Article {}", id))
        }
    }

    #[tokio::test]
    async fn free_user_gets_three_summaries_then_cache_hits_only() {
        let h = Harness::new(MockGenerator::ok());

        for (n, id) in [1, 2, 3].into_iter().enumerate() {
            match h.summarize(Some("u1"), id).await {
                SummaryOutcome::Generated { record, used_today } => {
                    assert_eq!(used_today, n as u32 + 1);
                    assert_eq!(record.content, format!("Summary of Article {}", id));
                }
                other => panic!("expected generation, got {:?}", other),
            }
        }

        match h.summarize(Some("u1"), 4).await {
            SummaryOutcome::Denied { access } => {
                let reason = access.reason.unwrap();
                assert!(reason.contains('3'));
                assert!(reason.contains("Premium Monthly"));
                assert_eq!(
                    access.required_tiers,
                    vec![PlanTier::PremiumMonthly, PlanTier::PremiumAnnual]
                );
            }
            other => panic!("expected denial, got {:?}", other),
        }

        assert!(matches!(
            h.summarize(Some("u1"), 1).await,
            SummaryOutcome::ServedFromCache { .. }
        ));
        assert_eq!(h.used("u1"), 3);
        assert_eq!(h.generator.calls(), 3);
    }

    #[tokio::test]
    async fn cached_summary_is_shared_across_users_at_no_cost() {
        let h = Harness::new(MockGenerator::ok());
        h.summarize(Some("alice"), 7).await;

        match h.summarize(Some("bob"), 7).await {
            SummaryOutcome::ServedFromCache { record } => assert_eq!(record.generated_by, "alice"),
            other => panic!("expected cache hit, got {:?}", other),
        }
        // Anonymous readers see it too
        assert!(matches!(
            h.summarize(None, 7).await,
            SummaryOutcome::ServedFromCache { .. }
        ));
        assert_eq!(h.used("bob"), 0);
        assert_eq!(h.generator.calls(), 1);
    }

    #[tokio::test]
    async fn anonymous_miss_is_denied_without_generation() {
        let h = Harness::new(MockGenerator::ok());
        match h.summarize(None, 1).await {
            SummaryOutcome::Denied { access } => {
                assert_eq!(access.denial_reason(), Some(&DenialReason::NotAuthenticated));
            }
            other => panic!("expected denial, got {:?}", other),
        }
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn generation_failure_consumes_no_quota() {
        let h = Harness::new(MockGenerator::failing());

        let result = h.service.summarize(Some("u1"), &article(1)).await;
        assert!(matches!(result, Err(PortalError::GenerationFailed(_))));
        assert_eq!(h.used("u1"), 0);
        assert!(h.service.get_summary(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_charge_leaves_nothing_cached() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()));
        let evaluator = Arc::new(EntitlementEvaluator::new(
            Arc::new(SubscriptionManager::new(Arc::new(SqliteProfileStore::new(db.clone())))),
            Arc::new(BrokenUsageStore),
            clock,
        ));
        let service = SummaryService::new(
            Arc::new(SummaryCache::new(Arc::new(SqliteSummaryStore::new(db)))),
            evaluator,
            Arc::new(MockGenerator::ok()),
        );

        let err = service.summarize(Some("u1"), &article(1)).await.unwrap_err();
        assert!(err.is_persistence());
        assert!(service.get_summary(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn premium_user_is_never_limited() {
        let h = Harness::new(MockGenerator::ok());
        h.billing
            .subscriptions
            .apply_plan_change("p1", PlanTier::PremiumAnnual)
            .unwrap();

        for id in 1..=12 {
            assert!(matches!(
                h.summarize(Some("p1"), id).await,
                SummaryOutcome::Generated { .. }
            ));
        }
        assert_eq!(h.used("p1"), 12);
        assert!(h
            .billing
            .evaluator
            .can_generate_summary(Some("p1"))
            .unwrap()
            .is_allowed());
    }

    #[tokio::test]
    async fn downgrade_mid_day_counts_everything_already_used() {
        let h = Harness::new(MockGenerator::ok());
        let subs = h.billing.subscriptions.clone();
        subs.apply_plan_change("u1", PlanTier::PremiumMonthly).unwrap();

        for id in 1..=5 {
            h.summarize(Some("u1"), id).await;
        }
        subs.apply_plan_change("u1", PlanTier::Free).unwrap();

        assert!(matches!(
            h.summarize(Some("u1"), 6).await,
            SummaryOutcome::Denied { .. }
        ));
        assert_eq!(h.used("u1"), 5);
    }

    #[tokio::test]
    async fn new_day_restores_free_quota() {
        let h = Harness::new(MockGenerator::ok());
        for id in 1..=3 {
            h.summarize(Some("u1"), id).await;
        }
        assert!(matches!(
            h.summarize(Some("u1"), 4).await,
            SummaryOutcome::Denied { .. }
        ));

        h.clock.advance_days(1);
        assert!(matches!(
            h.summarize(Some("u1"), 4).await,
            SummaryOutcome::Generated { used_today: 1, .. }
        ));
    }

    #[tokio::test]
    async fn repeated_request_while_generating_is_in_progress() {
        let gate = Arc::new(Notify::new());
        let h = Harness::new(MockGenerator::gated(gate.clone()));

        let service = h.service.clone();
        let first = tokio::spawn(async move { service.summarize(Some("u1"), &article(1)).await });

        while h.generator.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.summarize(Some("u1"), 1).await, SummaryOutcome::InProgress);

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, SummaryOutcome::Generated { used_today: 1, .. }));
        assert_eq!(h.generator.calls(), 1);
    }

    #[tokio::test]
    async fn losing_store_race_is_charged_and_served_first_record() {
        let gate = Arc::new(Notify::new());
        let h = Harness::new(MockGenerator::gated(gate.clone()));

        // Different users miss the cache for the same article at the same time
        let handles: Vec<_> = ["u1", "u2"]
            .into_iter()
            .map(|user| {
                let service = h.service.clone();
                tokio::spawn(async move { service.summarize(Some(user), &article(5)).await })
            })
            .collect();

        while h.generator.calls() < 2 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        gate.notify_one();

        let mut records = Vec::new();
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                SummaryOutcome::Generated { record, used_today } => {
                    assert_eq!(used_today, 1);
                    records.push(record);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(records[0], records[1]);
        assert_eq!(h.used("u1"), 1);
        assert_eq!(h.used("u2"), 1);
        assert_eq!(h.service.get_summary(5).unwrap(), Some(records[0].clone()));
    }

    #[tokio::test]
    async fn concurrent_sessions_cannot_overspend_last_unit() {
        let gate = Arc::new(Notify::new());
        let h = Harness::new(MockGenerator::gated(gate.clone()));
        let today = h.clock.today();
        for _ in 0..2 {
            h.billing
                .usage
                .increment_and_get("u1", UsageFeature::Summary, today)
                .unwrap();
        }

        // Both sessions pass the check at 2/3 before either is charged
        let handles: Vec<_> = [10, 11]
            .into_iter()
            .map(|id| {
                let service = h.service.clone();
                tokio::spawn(async move { service.summarize(Some("u1"), &article(id)).await })
            })
            .collect();

        while h.generator.calls() < 2 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        gate.notify_one();

        let mut generated = 0;
        let mut denied = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                SummaryOutcome::Generated { used_today, .. } => {
                    assert_eq!(used_today, 3);
                    generated += 1;
                }
                SummaryOutcome::Denied { .. } => denied += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!((generated, denied), (1, 1));
        assert_eq!(h.used("u1"), 3);
    }
}
