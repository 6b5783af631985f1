//! Applies normalized provider events to stored subscriptions.

use crate::clock::Clock;
use crate::engine::{self, maybe_finalize_cancellation, next_revision};
use crate::error::Result;
use crate::models::{
    BillingEvent, PaymentSucceeded, PlanCatalog, PlanType, ProviderEvent, SubscriptionRecord,
    SubscriptionStatus,
};
use crate::services::metrics::{record_reconcile_outcome, record_write_conflict};
use crate::services::plans::PlanResolver;
use crate::services::store::{SubscriptionStore, WriteOutcome};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Active records past their period end are only expired by the sweep once
/// this long has passed, leaving room for late provider renewals.
pub const LAPSE_GRACE_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    /// Matching record found; the event changed nothing.
    Unchanged,
    /// No-op event, or no record the event applies to.
    Discarded,
    /// Gave up after a repeated write conflict.
    Dropped,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Created => "created",
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::Unchanged => "unchanged",
            ReconcileOutcome::Discarded => "discarded",
            ReconcileOutcome::Dropped => "dropped",
        }
    }
}

enum Attempt {
    Done(ReconcileOutcome),
    Conflict,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub cancelled: usize,
    pub expired: usize,
    pub conflicts: usize,
    /// Stored records that fail invariant checks and are left untouched.
    pub invalid: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn SubscriptionStore>,
    plans: PlanResolver,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        plans: PlanResolver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            plans,
            clock,
        }
    }

    /// Reconcile one normalized event. Write conflicts are retried once from
    /// a fresh read and then dropped; the provider redelivers.
    #[instrument(
        skip(self, event),
        fields(
            provider = %event.provider,
            event_type = %event.event_type,
            provider_subscription_id = event.event.provider_subscription_id().unwrap_or("")
        )
    )]
    pub async fn reconcile(&self, event: &ProviderEvent) -> Result<ReconcileOutcome> {
        let kind = event.event.kind();

        let outcome = if matches!(event.event, BillingEvent::Ignored) {
            debug!("Event carries no state change");
            ReconcileOutcome::Discarded
        } else {
            self.reconcile_with_retry(event).await?
        };

        record_reconcile_outcome(kind, outcome.as_str());
        Ok(outcome)
    }

    async fn reconcile_with_retry(&self, event: &ProviderEvent) -> Result<ReconcileOutcome> {
        for attempt in 1..=2 {
            match self.try_reconcile(event).await? {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Conflict => {
                    record_write_conflict("reconcile");
                    debug!(attempt, "Write conflict, re-reading");
                }
            }
        }

        if event.event.affects_money() {
            error!(
                account_id = event.event.account_id().unwrap_or(""),
                kind = event.event.kind(),
                "Dropping money-affecting event after repeated write conflicts; replay manually"
            );
        } else {
            warn!(
                kind = event.event.kind(),
                "Dropping event after repeated write conflicts"
            );
        }

        Ok(ReconcileOutcome::Dropped)
    }

    async fn try_reconcile(&self, event: &ProviderEvent) -> Result<Attempt> {
        let now = self.clock.now();

        if let Some(provider_id) = event.event.provider_subscription_id() {
            if let Some(record) = self.store.find_by_provider_subscription_id(provider_id).await? {
                return self.apply(record, event, false, now).await;
            }
        }

        if let Some(record) = self.pending_to_adopt(&event.event).await? {
            info!(
                subscription_id = %record.id,
                account_id = %record.account_id,
                "Attaching provider subscription to pending checkout"
            );
            return self.apply(record, event, true, now).await;
        }

        match &event.event {
            BillingEvent::PaymentSucceeded(payment) => match payment.account_id.as_deref() {
                Some(account_id) => self.create(account_id, payment, event, now).await,
                None => {
                    warn!("First payment without account id, discarding");
                    Ok(Attempt::Done(ReconcileOutcome::Discarded))
                }
            },
            _ => {
                info!("No subscription matches event, discarding");
                Ok(Attempt::Done(ReconcileOutcome::Discarded))
            }
        }
    }

    /// Latest pending checkout of the event's account, for payment events
    /// whose provider id is not known yet.
    async fn pending_to_adopt(&self, event: &BillingEvent) -> Result<Option<SubscriptionRecord>> {
        let account_id = match event {
            BillingEvent::PaymentSucceeded(PaymentSucceeded {
                account_id: Some(account_id),
                ..
            })
            | BillingEvent::PaymentFailed {
                account_id: Some(account_id),
                ..
            } => account_id,
            _ => return Ok(None),
        };

        Ok(self.store.latest_pending_for_account(account_id).await?)
    }

    async fn catalog_for(
        &self,
        record: &SubscriptionRecord,
        event: &BillingEvent,
        now: DateTime<Utc>,
    ) -> PlanCatalog {
        match record.pending_change {
            Some(pending) if event.is_renewal_class() && pending.effective_at <= now => {
                self.plans.catalog_for(pending.plan_type).await
            }
            _ => self.plans.catalog().clone(),
        }
    }

    async fn apply(
        &self,
        record: SubscriptionRecord,
        event: &ProviderEvent,
        adopting: bool,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        let expected = record.updated_at;
        let mut next = record.clone();

        if adopting {
            next.provider = Some(event.provider);
            if let Some(provider_id) = event.event.provider_subscription_id() {
                next.provider_subscription_id = Some(provider_id.to_string());
            }
        }

        let catalog = self.catalog_for(&next, &event.event, now).await;
        engine::apply_event(&mut next, &event.event, &catalog, now)?;

        if next == record {
            debug!(subscription_id = %record.id, status = %record.status, "Event already applied");
            return Ok(Attempt::Done(ReconcileOutcome::Unchanged));
        }

        next.updated_at = next_revision(expected, now);

        match self.store.compare_and_set(&next, expected).await? {
            WriteOutcome::Written => {
                info!(
                    subscription_id = %next.id,
                    account_id = %next.account_id,
                    from = %record.status,
                    to = %next.status,
                    plan_type = %next.plan_type,
                    "Subscription reconciled"
                );
                Ok(Attempt::Done(ReconcileOutcome::Updated))
            }
            WriteOutcome::Conflict => Ok(Attempt::Conflict),
        }
    }

    async fn create(
        &self,
        account_id: &str,
        payment: &PaymentSucceeded,
        event: &ProviderEvent,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        let plan_type = payment.plan_type.unwrap_or(PlanType::Monthly);
        let amount = if payment.amount > rust_decimal::Decimal::ZERO {
            payment.amount
        } else {
            self.plans.catalog().get_plan(plan_type).amount
        };

        let record = SubscriptionRecord::new_active(
            account_id,
            plan_type,
            amount,
            event.provider,
            payment.provider_subscription_id.clone(),
            payment.period_start,
            payment.period_end,
            now,
        );

        match self.store.insert(&record).await? {
            WriteOutcome::Written => {
                info!(
                    subscription_id = %record.id,
                    account_id = %record.account_id,
                    plan_type = %record.plan_type,
                    amount = %record.amount,
                    "Subscription created from first payment"
                );
                Ok(Attempt::Done(ReconcileOutcome::Created))
            }
            // Another delivery created it first; the retry applies to that record.
            WriteOutcome::Conflict => Ok(Attempt::Conflict),
        }
    }

    /// Persist the lazy correction for active records past their period end.
    ///
    /// Cancel-at-period-end requests are finalized immediately; other lapsed
    /// records are expired once [`LAPSE_GRACE_DAYS`] have passed.
    #[instrument(skip(self))]
    pub async fn sweep_lapsed(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let expire_before = now - Duration::days(LAPSE_GRACE_DAYS);
        let mut report = SweepReport::default();

        for record in self.store.list_lapsed(now).await? {
            report.examined += 1;
            let expected = record.updated_at;
            let mut next = record.clone();

            let cancelled = maybe_finalize_cancellation(&mut next, now);
            if !cancelled {
                if !next.current_period_end.is_some_and(|end| end < expire_before) {
                    continue;
                }
                next.status = SubscriptionStatus::Expired;
            }

            if let Err(e) = engine::ensure_valid_transition(&record, &next) {
                error!(
                    subscription_id = %record.id,
                    account_id = %record.account_id,
                    error = %e,
                    "Skipping lapsed subscription that fails invariant checks"
                );
                report.invalid += 1;
                continue;
            }
            next.updated_at = next_revision(expected, now);

            match self.store.compare_and_set(&next, expected).await? {
                WriteOutcome::Written => {
                    if cancelled {
                        report.cancelled += 1;
                    } else {
                        report.expired += 1;
                    }
                    info!(
                        subscription_id = %next.id,
                        account_id = %next.account_id,
                        status = %next.status,
                        "Lapsed subscription corrected"
                    );
                }
                WriteOutcome::Conflict => {
                    // Picked up again on the next sweep.
                    record_write_conflict("sweep");
                    report.conflicts += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Provider, TrialGrant};
    use crate::services::memory::InMemorySubscriptionStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use service_core::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn setup(store: Arc<dyn SubscriptionStore>, now: DateTime<Utc>) -> (Reconciler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let plans = PlanResolver::new(PlanCatalog::default(), None, std::time::Duration::from_millis(50));
        (Reconciler::new(store, plans, clock.clone()), clock)
    }

    fn first_payment(provider_id: &str) -> ProviderEvent {
        ProviderEvent::new(
            Provider::Pagarme,
            "order.paid",
            BillingEvent::PaymentSucceeded(PaymentSucceeded {
                account_id: Some("U1".to_string()),
                plan_type: Some(PlanType::Monthly),
                provider_subscription_id: provider_id.to_string(),
                period_start: at(2025, 11, 1),
                period_end: at(2025, 12, 1),
                amount: dec!(79.00),
            }),
        )
    }

    #[tokio::test]
    async fn test_first_payment_creates_active_record() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let (reconciler, _) = setup(store.clone(), at(2025, 11, 1));

        let outcome = reconciler.reconcile(&first_payment("sub_1")).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created);

        let record = store
            .find_by_provider_subscription_id("sub_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.account_id, "U1");
        assert_eq!(record.current_period_start, Some(at(2025, 11, 1)));
        assert_eq!(record.current_period_end, Some(at(2025, 12, 1)));
        assert_eq!(record.amount, dec!(79.00));

        let again = reconciler.reconcile(&first_payment("sub_1")).await.unwrap();
        assert_eq!(again, ReconcileOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_discarded() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let (reconciler, _) = setup(store, at(2025, 11, 1));

        let event = ProviderEvent::new(
            Provider::Stripe,
            "customer.subscription.deleted",
            BillingEvent::SubscriptionCanceled {
                provider_subscription_id: "sub_missing".to_string(),
            },
        );
        assert_eq!(
            reconciler.reconcile(&event).await.unwrap(),
            ReconcileOutcome::Discarded
        );
    }

    #[tokio::test]
    async fn test_payment_adopts_pending_checkout() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let pending = SubscriptionRecord::new_pending(
            "U1",
            PlanCatalog::default().get_plan(PlanType::Monthly),
            None,
            None,
            at(2025, 10, 31),
        );
        store.insert(&pending).await.unwrap();
        let (reconciler, _) = setup(store.clone(), at(2025, 11, 1));

        let outcome = reconciler.reconcile(&first_payment("sub_9")).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated);

        let record = store.get(pending.id).await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.provider, Some(Provider::Pagarme));
        assert_eq!(record.provider_subscription_id.as_deref(), Some("sub_9"));
    }

    #[tokio::test]
    async fn test_sweep_finalizes_and_expires() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let (reconciler, clock) = setup(store.clone(), at(2025, 11, 1));
        reconciler.reconcile(&first_payment("sub_a")).await.unwrap();
        reconciler.reconcile(&first_payment("sub_b")).await.unwrap();

        let mut flagged = store
            .find_by_provider_subscription_id("sub_a")
            .await
            .unwrap()
            .unwrap();
        let expected = flagged.updated_at;
        flagged.cancel_at_period_end = true;
        flagged.updated_at = next_revision(expected, at(2025, 11, 2));
        store.compare_and_set(&flagged, expected).await.unwrap();

        clock.set(at(2025, 12, 2));
        let report = reconciler.sweep_lapsed().await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.expired, 0);

        clock.set(at(2025, 12, 10));
        let report = reconciler.sweep_lapsed().await.unwrap();
        assert_eq!(report.expired, 1);

        let lapsed = store
            .find_by_provider_subscription_id("sub_b")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lapsed.status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn test_sweep_skips_corrupt_record_and_continues() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let (reconciler, clock) = setup(store.clone(), at(2025, 11, 1));
        reconciler.reconcile(&first_payment("sub_bad")).await.unwrap();
        reconciler.reconcile(&first_payment("sub_ok")).await.unwrap();

        // Active with a cancellation timestamp, and listed first.
        let mut corrupt = store
            .find_by_provider_subscription_id("sub_bad")
            .await
            .unwrap()
            .unwrap();
        let expected = corrupt.updated_at;
        corrupt.current_period_start = Some(at(2025, 10, 20));
        corrupt.current_period_end = Some(at(2025, 11, 20));
        corrupt.cancelled_at = Some(at(2025, 11, 2));
        corrupt.updated_at = next_revision(expected, at(2025, 11, 2));
        store.compare_and_set(&corrupt, expected).await.unwrap();

        clock.set(at(2025, 12, 10));
        let report = reconciler.sweep_lapsed().await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.expired, 1);

        let untouched = store.get(corrupt.id).await.unwrap().unwrap();
        assert_eq!(untouched, corrupt);
        let lapsed = store
            .find_by_provider_subscription_id("sub_ok")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lapsed.status, SubscriptionStatus::Expired);
    }

    /// Reports a conflict for the first N compare-and-set calls.
    struct Contended {
        inner: InMemorySubscriptionStore,
        conflicts_left: AtomicUsize,
    }

    #[async_trait]
    impl SubscriptionStore for Contended {
        async fn get(&self, id: Uuid) -> std::result::Result<Option<SubscriptionRecord>, AppError> {
            self.inner.get(id).await
        }
        async fn find_by_provider_subscription_id(
            &self,
            id: &str,
        ) -> std::result::Result<Option<SubscriptionRecord>, AppError> {
            self.inner.find_by_provider_subscription_id(id).await
        }
        async fn latest_for_account(
            &self,
            account_id: &str,
        ) -> std::result::Result<Option<SubscriptionRecord>, AppError> {
            self.inner.latest_for_account(account_id).await
        }
        async fn latest_pending_for_account(
            &self,
            account_id: &str,
        ) -> std::result::Result<Option<SubscriptionRecord>, AppError> {
            self.inner.latest_pending_for_account(account_id).await
        }
        async fn insert(&self, record: &SubscriptionRecord) -> std::result::Result<WriteOutcome, AppError> {
            self.inner.insert(record).await
        }
        async fn compare_and_set(
            &self,
            record: &SubscriptionRecord,
            expected: DateTime<Utc>,
        ) -> std::result::Result<WriteOutcome, AppError> {
            let left = self.conflicts_left.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts_left.store(left - 1, Ordering::SeqCst);
                return Ok(WriteOutcome::Conflict);
            }
            self.inner.compare_and_set(record, expected).await
        }
        async fn list_lapsed(&self, now: DateTime<Utc>) -> std::result::Result<Vec<SubscriptionRecord>, AppError> {
            self.inner.list_lapsed(now).await
        }
        async fn get_trial(&self, account_id: &str) -> std::result::Result<Option<TrialGrant>, AppError> {
            self.inner.get_trial(account_id).await
        }
        async fn insert_trial(&self, grant: &TrialGrant) -> std::result::Result<TrialGrant, AppError> {
            self.inner.insert_trial(grant).await
        }
        async fn add_free_months(
            &self,
            account_id: &str,
            months: i32,
            now: DateTime<Utc>,
        ) -> std::result::Result<Option<TrialGrant>, AppError> {
            self.inner.add_free_months(account_id, months, now).await
        }
        async fn health_check(&self) -> std::result::Result<(), AppError> {
            Ok(())
        }
    }

    fn canceled(provider_id: &str) -> ProviderEvent {
        ProviderEvent::new(
            Provider::Pagarme,
            "subscription.canceled",
            BillingEvent::SubscriptionCanceled {
                provider_subscription_id: provider_id.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_single_conflict_is_retried() {
        let store = Arc::new(Contended {
            inner: InMemorySubscriptionStore::new(),
            conflicts_left: AtomicUsize::new(1),
        });
        let (reconciler, _) = setup(store.clone(), at(2025, 11, 1));
        reconciler.reconcile(&first_payment("sub_1")).await.unwrap();

        let outcome = reconciler.reconcile(&canceled("sub_1")).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated);
    }

    #[tokio::test]
    async fn test_repeated_conflict_is_dropped() {
        let store = Arc::new(Contended {
            inner: InMemorySubscriptionStore::new(),
            conflicts_left: AtomicUsize::new(2),
        });
        let (reconciler, _) = setup(store.clone(), at(2025, 11, 1));
        reconciler.reconcile(&first_payment("sub_1")).await.unwrap();

        let outcome = reconciler.reconcile(&canceled("sub_1")).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Dropped);

        let record = store
            .find_by_provider_subscription_id("sub_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
    }
}
