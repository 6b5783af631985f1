//! Access verdicts.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

use super::subscription::SubscriptionStatus;

/// Status reported alongside an access verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Trial,
    TrialExpired,
    None,
    Pending,
    Active,
    Cancelled,
    Expired,
    Suspended,
    Failed,
}

impl AccessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessStatus::Trial => "trial",
            AccessStatus::TrialExpired => "trial_expired",
            AccessStatus::None => "none",
            AccessStatus::Pending => "pending",
            AccessStatus::Active => "active",
            AccessStatus::Cancelled => "cancelled",
            AccessStatus::Expired => "expired",
            AccessStatus::Suspended => "suspended",
            AccessStatus::Failed => "failed",
        }
    }
}

/// Why access was granted or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessReason {
    TrialActive,
    TrialExpiredNoSubscription,
    NoSubscription,
    SubscriptionActive,
    PeriodExpired,
    CancelledWithinGrace,
    CancelledPeriodEnded,
    AwaitingConfirmation,
    Blocked(SubscriptionStatus),
}

impl fmt::Display for AccessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessReason::TrialActive => f.write_str("trial active"),
            AccessReason::TrialExpiredNoSubscription => {
                f.write_str("trial expired, no subscription")
            }
            AccessReason::NoSubscription => f.write_str("no subscription"),
            AccessReason::SubscriptionActive => f.write_str("subscription active"),
            AccessReason::PeriodExpired => f.write_str("period expired"),
            AccessReason::CancelledWithinGrace => {
                f.write_str("subscription cancelled, access until period end")
            }
            AccessReason::CancelledPeriodEnded => {
                f.write_str("subscription cancelled, period ended")
            }
            AccessReason::AwaitingConfirmation => f.write_str("awaiting confirmation"),
            AccessReason::Blocked(status) => write!(f, "subscription {}", status),
        }
    }
}

impl Serialize for AccessReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessResult {
    pub has_access: bool,
    pub reason: AccessReason,
    pub status: AccessStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
}

impl AccessResult {
    pub fn denied(reason: AccessReason, status: AccessStatus) -> Self {
        Self {
            has_access: false,
            reason,
            status,
            expires_at: None,
            days_remaining: None,
        }
    }
}
