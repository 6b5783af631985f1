//! Access evaluation. First matching rule wins: trial, missing record, then
//! the record's status.

use super::ceil_days;
use crate::models::{
    AccessReason, AccessResult, AccessStatus, SubscriptionRecord, SubscriptionStatus, TrialGrant,
};
use chrono::{DateTime, Utc};

fn granted(
    reason: AccessReason,
    status: AccessStatus,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> AccessResult {
    AccessResult {
        has_access: true,
        reason,
        status,
        expires_at,
        days_remaining: expires_at.map(|end| ceil_days(end - now)),
    }
}

pub fn evaluate_access(
    trial: Option<&TrialGrant>,
    record: Option<&SubscriptionRecord>,
    now: DateTime<Utc>,
) -> AccessResult {
    if let Some(trial) = trial {
        let trial_end = trial.effective_end();
        if now <= trial_end {
            return granted(AccessReason::TrialActive, AccessStatus::Trial, Some(trial_end), now);
        }
    }

    let Some(record) = record else {
        return if trial.is_some() {
            AccessResult::denied(
                AccessReason::TrialExpiredNoSubscription,
                AccessStatus::TrialExpired,
            )
        } else {
            AccessResult::denied(AccessReason::NoSubscription, AccessStatus::None)
        };
    };

    let period_end = record.current_period_end;

    match record.status {
        SubscriptionStatus::Active => match period_end {
            Some(end) if now > end => AccessResult {
                expires_at: Some(end),
                ..AccessResult::denied(AccessReason::PeriodExpired, AccessStatus::Expired)
            },
            _ => granted(
                AccessReason::SubscriptionActive,
                AccessStatus::Active,
                period_end,
                now,
            ),
        },
        SubscriptionStatus::Cancelled => match period_end {
            Some(end) if now <= end => granted(
                AccessReason::CancelledWithinGrace,
                AccessStatus::Cancelled,
                Some(end),
                now,
            ),
            _ => AccessResult {
                expires_at: period_end,
                ..AccessResult::denied(AccessReason::CancelledPeriodEnded, AccessStatus::Cancelled)
            },
        },
        SubscriptionStatus::Pending => AccessResult {
            has_access: true,
            reason: AccessReason::AwaitingConfirmation,
            status: AccessStatus::Pending,
            expires_at: None,
            days_remaining: None,
        },
        SubscriptionStatus::Expired => AccessResult::denied(
            AccessReason::Blocked(SubscriptionStatus::Expired),
            AccessStatus::Expired,
        ),
        SubscriptionStatus::Suspended => AccessResult::denied(
            AccessReason::Blocked(SubscriptionStatus::Suspended),
            AccessStatus::Suspended,
        ),
        SubscriptionStatus::Failed => AccessResult::denied(
            AccessReason::Blocked(SubscriptionStatus::Failed),
            AccessStatus::Failed,
        ),
    }
}
