//! Cancel-at-period-end, immediate cancellation and boundary conversion.

use crate::error::{Result, SubscriptionError};
use crate::models::{SubscriptionRecord, SubscriptionStatus};
use chrono::{DateTime, Utc};

/// Flag the subscription to end with its current period. Status is unchanged.
pub fn request_cancellation(record: &mut SubscriptionRecord) -> Result<()> {
    if record.status.is_terminal() {
        return Err(SubscriptionError::InvalidTransition(format!(
            "subscription {} is already {}",
            record.id, record.status
        )));
    }

    record.cancel_at_period_end = true;
    Ok(())
}

/// Cancel now. An already cancelled record is left as is and reported unchanged.
pub fn cancel_immediately(record: &mut SubscriptionRecord, now: DateTime<Utc>) -> Result<bool> {
    match record.status {
        SubscriptionStatus::Cancelled => Ok(false),
        SubscriptionStatus::Expired => Err(SubscriptionError::InvalidTransition(format!(
            "subscription {} is already expired",
            record.id
        ))),
        _ => {
            record.status = SubscriptionStatus::Cancelled;
            record.cancelled_at = Some(now);
            record.cancel_at_period_end = false;
            Ok(true)
        }
    }
}

/// Convert a cancel-at-period-end request once the boundary is reached.
pub fn maybe_finalize_cancellation(record: &mut SubscriptionRecord, now: DateTime<Utc>) -> bool {
    if !record.cancel_at_period_end || record.status == SubscriptionStatus::Expired {
        return false;
    }

    let Some(period_end) = record.current_period_end else {
        return false;
    };

    if now < period_end {
        return false;
    }

    if record.status != SubscriptionStatus::Cancelled {
        record.status = SubscriptionStatus::Cancelled;
        record.cancelled_at = Some(now);
    }
    record.cancel_at_period_end = false;

    true
}
