//! Refund eligibility from elapsed usage.

use super::ceil_days;
use crate::models::SubscriptionRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Last usage day that still qualifies for a refund.
pub const REFUND_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefundEligibility {
    pub eligible: bool,
    pub days_used: i64,
    pub refund_window_days: i64,
}

/// Days started since the current period began (creation time if unknown).
pub fn days_used(record: &SubscriptionRecord, now: DateTime<Utc>) -> i64 {
    let basis = record.current_period_start.unwrap_or(record.created_at);
    ceil_days(now - basis)
}

/// Window check only; callers reject records already refunded.
pub fn check_eligibility(record: &SubscriptionRecord, now: DateTime<Utc>) -> RefundEligibility {
    let days_used = days_used(record, now);
    RefundEligibility {
        eligible: days_used <= REFUND_WINDOW_DAYS,
        days_used,
        refund_window_days: REFUND_WINDOW_DAYS,
    }
}
