//! Account-facing subscription operations.

use crate::clock::Clock;
use crate::engine::{self, next_revision, RefundEligibility};
use crate::error::{Result, SubscriptionError};
use crate::models::{
    AccessResult, PlanType, Provider, SubscriptionRecord, SubscriptionStatus, TrialGrant,
};
use crate::services::metrics::{record_access_check, record_write_conflict};
use crate::services::plans::PlanResolver;
use crate::services::store::{SubscriptionStore, WriteOutcome};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Promotional months accepted in a single grant.
pub const MAX_FREE_MONTHS_PER_GRANT: i32 = 24;

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    plans: PlanResolver,
    clock: Arc<dyn Clock>,
    trial_days: i64,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        plans: PlanResolver,
        clock: Arc<dyn Clock>,
        trial_days: i64,
    ) -> Self {
        Self {
            store,
            plans,
            clock,
            trial_days,
        }
    }

    /// Access verdict for the account's trial and most recent subscription.
    #[instrument(skip(self))]
    pub async fn check_access(&self, account_id: &str) -> Result<AccessResult> {
        let trial = self.store.get_trial(account_id).await?;
        let record = self.store.latest_for_account(account_id).await?;

        let result = engine::evaluate_access(trial.as_ref(), record.as_ref(), self.clock.now());
        record_access_check(result.status.as_str(), result.has_access);
        Ok(result)
    }

    pub async fn get(&self, id: Uuid) -> Result<SubscriptionRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SubscriptionError::NotFound(format!("Subscription {}", id)))
    }

    /// Read-modify-write with one retry on a concurrent update.
    async fn update<F>(
        &self,
        id: Uuid,
        operation: &'static str,
        mut change: F,
    ) -> Result<SubscriptionRecord>
    where
        F: FnMut(&mut SubscriptionRecord, DateTime<Utc>) -> Result<()>,
    {
        for _ in 0..2 {
            let current = self.get(id).await?;
            let now = self.clock.now();
            let mut next = current.clone();

            change(&mut next, now)?;
            if next == current {
                return Ok(current);
            }
            engine::ensure_valid_transition(&current, &next)?;
            next.updated_at = next_revision(current.updated_at, now);

            match self.store.compare_and_set(&next, current.updated_at).await? {
                WriteOutcome::Written => return Ok(next),
                WriteOutcome::Conflict => record_write_conflict(operation),
            }
        }

        Err(SubscriptionError::ReconcileConflict(id.to_string()))
    }

    /// Cancel now, or flag the subscription to end with its paid period.
    #[instrument(skip(self), fields(subscription_id = %id))]
    pub async fn cancel(&self, id: Uuid, immediate: bool) -> Result<SubscriptionRecord> {
        let record = self
            .update(id, "cancel", |record, now| {
                if immediate {
                    if record.status == SubscriptionStatus::Cancelled {
                        return Err(SubscriptionError::InvalidTransition(format!(
                            "subscription {} is already cancelled",
                            record.id
                        )));
                    }
                    engine::cancel_immediately(record, now).map(|_| ())
                } else {
                    engine::request_cancellation(record)
                }
            })
            .await?;

        info!(
            account_id = %record.account_id,
            immediate,
            status = %record.status,
            "Cancellation recorded"
        );
        Ok(record)
    }

    #[instrument(skip(self), fields(subscription_id = %id))]
    pub async fn schedule_plan_change(
        &self,
        id: Uuid,
        plan_type: PlanType,
    ) -> Result<SubscriptionRecord> {
        let record = self
            .update(id, "schedule_plan_change", |record, _| {
                engine::schedule_plan_change(record, plan_type)
            })
            .await?;

        info!(
            account_id = %record.account_id,
            from = %record.plan_type,
            to = %plan_type,
            effective_at = ?record.pending_change.map(|c| c.effective_at),
            "Plan change scheduled"
        );
        Ok(record)
    }

    pub async fn refund_eligibility(&self, id: Uuid) -> Result<RefundEligibility> {
        let record = self.get(id).await?;
        let mut eligibility = engine::check_eligibility(&record, self.clock.now());
        if record.refund_processed_at.is_some() {
            eligibility.eligible = false;
        }
        Ok(eligibility)
    }

    /// Mark a refund as processed and end the subscription.
    #[instrument(skip(self), fields(subscription_id = %id))]
    pub async fn record_refund(&self, id: Uuid) -> Result<SubscriptionRecord> {
        let record = self
            .update(id, "record_refund", |record, now| {
                if record.refund_processed_at.is_some() {
                    return Err(SubscriptionError::InvalidTransition(format!(
                        "refund on subscription {} is already recorded",
                        record.id
                    )));
                }

                let eligibility = engine::check_eligibility(record, now);
                if !eligibility.eligible {
                    return Err(SubscriptionError::InvalidTransition(format!(
                        "{} days used exceeds the {} day refund window",
                        eligibility.days_used, eligibility.refund_window_days
                    )));
                }

                record.refund_processed_at = Some(now);
                if !record.status.is_terminal() {
                    engine::cancel_immediately(record, now)?;
                }
                Ok(())
            })
            .await?;

        info!(
            account_id = %record.account_id,
            amount = %record.amount,
            "Refund recorded"
        );
        Ok(record)
    }

    /// Open a pending subscription priced from the catalog.
    #[instrument(skip(self))]
    pub async fn open_checkout(
        &self,
        account_id: &str,
        plan_type: PlanType,
        provider: Option<Provider>,
        provider_subscription_id: Option<String>,
    ) -> Result<SubscriptionRecord> {
        if let Some(current) = self.store.latest_for_account(account_id).await? {
            if matches!(
                current.status,
                SubscriptionStatus::Active | SubscriptionStatus::Suspended
            ) {
                return Err(SubscriptionError::InvalidTransition(format!(
                    "account {} already has a {} subscription",
                    account_id, current.status
                )));
            }
        }

        let plan = self.plans.catalog().get_plan(plan_type);
        let record = SubscriptionRecord::new_pending(
            account_id,
            plan,
            provider,
            provider_subscription_id,
            self.clock.now(),
        );

        match self.store.insert(&record).await? {
            WriteOutcome::Written => {
                info!(
                    subscription_id = %record.id,
                    plan_type = %plan_type,
                    amount = %record.amount,
                    "Checkout opened"
                );
                Ok(record)
            }
            WriteOutcome::Conflict => Err(SubscriptionError::InvalidTransition(format!(
                "provider subscription {} is already linked",
                record.provider_subscription_id.as_deref().unwrap_or_default()
            ))),
        }
    }

    /// Create the account's trial grant if it has none; idempotent.
    #[instrument(skip(self))]
    pub async fn ensure_trial(
        &self,
        account_id: &str,
        account_created_at: DateTime<Utc>,
        trial_ends_at: Option<DateTime<Utc>>,
    ) -> Result<TrialGrant> {
        let ends_at =
            trial_ends_at.unwrap_or_else(|| account_created_at + Duration::days(self.trial_days));
        let grant = TrialGrant::new(account_id, ends_at, self.clock.now());
        Ok(self.store.insert_trial(&grant).await?)
    }

    #[instrument(skip(self))]
    pub async fn grant_free_months(&self, account_id: &str, months: i32) -> Result<TrialGrant> {
        if !(1..=MAX_FREE_MONTHS_PER_GRANT).contains(&months) {
            return Err(SubscriptionError::InvalidPayload(format!(
                "free months must be between 1 and {}",
                MAX_FREE_MONTHS_PER_GRANT
            )));
        }

        let grant = self
            .store
            .add_free_months(account_id, months, self.clock.now())
            .await?
            .ok_or_else(|| {
                SubscriptionError::NotFound(format!("Trial for account {}", account_id))
            })?;

        info!(
            free_months = grant.free_months,
            effective_end = %grant.effective_end(),
            "Free months granted"
        );
        Ok(grant)
    }
}
