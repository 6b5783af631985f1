//! Subscription record model.

use super::plan::{Plan, PlanType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
    Suspended,
    Failed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SubscriptionStatus::Pending),
            "active" => Some(SubscriptionStatus::Active),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "expired" => Some(SubscriptionStatus::Expired),
            "suspended" => Some(SubscriptionStatus::Suspended),
            "failed" => Some(SubscriptionStatus::Failed),
            _ => None,
        }
    }

    /// Cancelled and expired records never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment provider that issued a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Stripe,
    Pagarme,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Stripe => "stripe",
            Provider::Pagarme => "pagarme",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stripe" => Some(Provider::Stripe),
            "pagarme" => Some(Provider::Pagarme),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plan change waiting for its period boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPlanChange {
    pub plan_type: PlanType,
    pub effective_at: DateTime<Utc>,
}

/// Locally persisted subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub account_id: String,
    pub plan_type: PlanType,
    pub amount: Decimal,
    pub status: SubscriptionStatus,
    pub provider: Option<Provider>,
    pub provider_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    /// Paid entitlement ends here.
    pub current_period_end: Option<DateTime<Utc>>,
    pub pending_change: Option<PendingPlanChange>,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refund_processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency revision.
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Record opened at checkout, before the provider confirms payment.
    pub fn new_pending(
        account_id: impl Into<String>,
        plan: &Plan,
        provider: Option<Provider>,
        provider_subscription_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.into(),
            plan_type: plan.plan_type,
            amount: plan.amount,
            status: SubscriptionStatus::Pending,
            provider,
            provider_subscription_id,
            current_period_start: None,
            current_period_end: None,
            pending_change: None,
            cancel_at_period_end: false,
            cancelled_at: None,
            refund_processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record created straight from a first confirmed payment.
    #[allow(clippy::too_many_arguments)]
    pub fn new_active(
        account_id: impl Into<String>,
        plan_type: PlanType,
        amount: Decimal,
        provider: Provider,
        provider_subscription_id: impl Into<String>,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.into(),
            plan_type,
            amount,
            status: SubscriptionStatus::Active,
            provider: Some(provider),
            provider_subscription_id: Some(provider_subscription_id.into()),
            current_period_start: Some(period_start),
            current_period_end: Some(period_end.max(period_start)),
            pending_change: None,
            cancel_at_period_end: false,
            cancelled_at: None,
            refund_processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Structural invariants every persisted record satisfies.
    pub fn check_invariants(&self) -> Result<(), String> {
        if let (Some(start), Some(end)) = (self.current_period_start, self.current_period_end) {
            if end < start {
                return Err(format!(
                    "period end {} precedes period start {}",
                    end, start
                ));
            }
        }

        let is_cancelled = self.status == SubscriptionStatus::Cancelled;
        if is_cancelled != self.cancelled_at.is_some() {
            return Err(format!(
                "cancelled_at must be set exactly when status is cancelled (status {})",
                self.status
            ));
        }

        Ok(())
    }
}

/// Database row for `subscriptions`.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub account_id: String,
    pub plan_type: String,
    pub amount: Decimal,
    pub status: String,
    pub provider: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub pending_plan_type: Option<String>,
    pub pending_plan_change_at: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refund_processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn corrupt(id: Uuid, what: &str, value: &str) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!(
        "Subscription {} has invalid {} '{}'",
        id,
        what,
        value
    ))
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = AppError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let plan_type = PlanType::parse(&row.plan_type)
            .ok_or_else(|| corrupt(row.id, "plan_type", &row.plan_type))?;
        let status = SubscriptionStatus::parse(&row.status)
            .ok_or_else(|| corrupt(row.id, "status", &row.status))?;
        let provider = match row.provider.as_deref() {
            Some(p) => Some(Provider::parse(p).ok_or_else(|| corrupt(row.id, "provider", p))?),
            None => None,
        };
        let pending_change = match (row.pending_plan_type.as_deref(), row.pending_plan_change_at) {
            (Some(p), Some(effective_at)) => Some(PendingPlanChange {
                plan_type: PlanType::parse(p)
                    .ok_or_else(|| corrupt(row.id, "pending_plan_type", p))?,
                effective_at,
            }),
            (None, None) => None,
            _ => return Err(corrupt(row.id, "pending plan change", "half-set")),
        };

        Ok(Self {
            id: row.id,
            account_id: row.account_id,
            plan_type,
            amount: row.amount,
            status,
            provider,
            provider_subscription_id: row.provider_subscription_id,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            pending_change,
            cancel_at_period_end: row.cancel_at_period_end,
            cancelled_at: row.cancelled_at,
            refund_processed_at: row.refund_processed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
