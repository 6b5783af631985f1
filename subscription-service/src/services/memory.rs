//! In-process store for tests and local runs.

use super::store::{SubscriptionStore, WriteOutcome};
use crate::models::{SubscriptionRecord, SubscriptionStatus, TrialGrant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<Uuid, SubscriptionRecord>,
    trials: HashMap<String, TrialGrant>,
}

#[derive(Clone, Default)]
pub struct InMemorySubscriptionStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn provider_id_taken(inner: &Inner, record: &SubscriptionRecord) -> bool {
    let Some(provider_id) = record.provider_subscription_id.as_deref() else {
        return false;
    };
    inner.subscriptions.values().any(|other| {
        other.id != record.id && other.provider_subscription_id.as_deref() == Some(provider_id)
    })
}

fn latest<'a>(
    records: impl Iterator<Item = &'a SubscriptionRecord>,
) -> Option<SubscriptionRecord> {
    records
        .max_by_key(|r| (r.created_at, r.updated_at))
        .cloned()
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn get(&self, id: Uuid) -> Result<Option<SubscriptionRecord>, AppError> {
        Ok(self.inner.read().await.subscriptions.get(&id).cloned())
    }

    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .values()
            .find(|r| r.provider_subscription_id.as_deref() == Some(provider_subscription_id))
            .cloned())
    }

    async fn latest_for_account(
        &self,
        account_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        let inner = self.inner.read().await;
        Ok(latest(
            inner
                .subscriptions
                .values()
                .filter(|r| r.account_id == account_id),
        ))
    }

    async fn latest_pending_for_account(
        &self,
        account_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        let inner = self.inner.read().await;
        Ok(latest(inner.subscriptions.values().filter(|r| {
            r.account_id == account_id && r.status == SubscriptionStatus::Pending
        })))
    }

    async fn insert(&self, record: &SubscriptionRecord) -> Result<WriteOutcome, AppError> {
        let mut inner = self.inner.write().await;
        if inner.subscriptions.contains_key(&record.id) || provider_id_taken(&inner, record) {
            return Ok(WriteOutcome::Conflict);
        }
        inner.subscriptions.insert(record.id, record.clone());
        Ok(WriteOutcome::Written)
    }

    async fn compare_and_set(
        &self,
        record: &SubscriptionRecord,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, AppError> {
        let mut inner = self.inner.write().await;
        let matches = inner
            .subscriptions
            .get(&record.id)
            .is_some_and(|stored| stored.updated_at == expected_updated_at);
        if !matches || provider_id_taken(&inner, record) {
            return Ok(WriteOutcome::Conflict);
        }
        inner.subscriptions.insert(record.id, record.clone());
        Ok(WriteOutcome::Written)
    }

    async fn list_lapsed(&self, now: DateTime<Utc>) -> Result<Vec<SubscriptionRecord>, AppError> {
        let inner = self.inner.read().await;
        let mut lapsed: Vec<_> = inner
            .subscriptions
            .values()
            .filter(|r| {
                r.status == SubscriptionStatus::Active
                    && r.current_period_end.is_some_and(|end| end < now)
            })
            .cloned()
            .collect();
        lapsed.sort_by_key(|r| r.current_period_end);
        Ok(lapsed)
    }

    async fn get_trial(&self, account_id: &str) -> Result<Option<TrialGrant>, AppError> {
        Ok(self.inner.read().await.trials.get(account_id).cloned())
    }

    async fn insert_trial(&self, grant: &TrialGrant) -> Result<TrialGrant, AppError> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .trials
            .entry(grant.account_id.clone())
            .or_insert_with(|| grant.clone())
            .clone())
    }

    async fn add_free_months(
        &self,
        account_id: &str,
        months: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<TrialGrant>, AppError> {
        let mut inner = self.inner.write().await;
        Ok(inner.trials.get_mut(account_id).map(|grant| {
            grant.free_months += months;
            grant.updated_at = now;
            grant.clone()
        }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
