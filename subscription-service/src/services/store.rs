//! Read/write contract for subscription persistence.

use crate::models::{SubscriptionRecord, TrialGrant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The stored revision moved on, or a unique key was taken concurrently.
    Conflict,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<SubscriptionRecord>, AppError>;

    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError>;

    /// Most recently created record for the account, any status.
    async fn latest_for_account(
        &self,
        account_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError>;

    async fn latest_pending_for_account(
        &self,
        account_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError>;

    async fn insert(&self, record: &SubscriptionRecord) -> Result<WriteOutcome, AppError>;

    /// Replace the stored record only if its revision still equals
    /// `expected_updated_at`.
    async fn compare_and_set(
        &self,
        record: &SubscriptionRecord,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, AppError>;

    /// Active records whose paid period ended before `now`.
    async fn list_lapsed(&self, now: DateTime<Utc>) -> Result<Vec<SubscriptionRecord>, AppError>;

    async fn get_trial(&self, account_id: &str) -> Result<Option<TrialGrant>, AppError>;

    /// Insert unless the account already has a grant; returns the stored grant.
    async fn insert_trial(&self, grant: &TrialGrant) -> Result<TrialGrant, AppError>;

    async fn add_free_months(
        &self,
        account_id: &str,
        months: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<TrialGrant>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}
