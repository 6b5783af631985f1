//! Status state machine driven by normalized provider events.

use super::cancellation::{cancel_immediately, maybe_finalize_cancellation};
use super::plan_change::apply_due_plan_change;
use crate::error::{Result, SubscriptionError};
use crate::models::{BillingEvent, PlanCatalog, SubscriptionRecord, SubscriptionStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Move the paid window forward. Stale windows (ending before the stored
/// one) are ignored so out-of-order deliveries cannot rewind a record.
fn renew(record: &mut SubscriptionRecord, start: DateTime<Utc>, end: DateTime<Utc>) {
    if end < start {
        return;
    }

    let advances = record
        .current_period_end
        .map_or(true, |current| end >= current);

    if advances {
        record.current_period_start = Some(start);
        record.current_period_end = Some(end);
        record.status = SubscriptionStatus::Active;
    } else if record.status == SubscriptionStatus::Pending {
        record.status = SubscriptionStatus::Active;
    }
}

/// Apply `event` to an existing record. Returns `true` when anything changed.
///
/// Terminal records are never modified. Renewal-class events first check the
/// cancel-at-period-end boundary against the stored period; a record that
/// crosses it is cancelled and the renewal is not applied.
pub fn apply_event(
    record: &mut SubscriptionRecord,
    event: &BillingEvent,
    catalog: &PlanCatalog,
    now: DateTime<Utc>,
) -> Result<bool> {
    if record.status.is_terminal() {
        return Ok(false);
    }

    let before = record.clone();

    match event {
        BillingEvent::PaymentSucceeded(payment) => {
            if !maybe_finalize_cancellation(record, now) {
                if record.status == SubscriptionStatus::Pending {
                    if let Some(plan_type) = payment.plan_type {
                        record.plan_type = plan_type;
                    }
                    if payment.amount > Decimal::ZERO {
                        record.amount = payment.amount;
                    }
                }
                renew(record, payment.period_start, payment.period_end);
                apply_due_plan_change(record, catalog, now);
            }
        }
        BillingEvent::SubscriptionRenewed {
            period_start,
            period_end,
            ..
        } => {
            if !maybe_finalize_cancellation(record, now) {
                renew(record, *period_start, *period_end);
                apply_due_plan_change(record, catalog, now);
            }
        }
        BillingEvent::PaymentFailed { .. } => {
            if !maybe_finalize_cancellation(record, now)
                && record.status == SubscriptionStatus::Pending
            {
                record.status = SubscriptionStatus::Failed;
            }
        }
        BillingEvent::SubscriptionCanceled { .. } => {
            cancel_immediately(record, now)?;
        }
        BillingEvent::SubscriptionExpired { .. } => {
            record.status = SubscriptionStatus::Expired;
            record.cancel_at_period_end = false;
        }
        BillingEvent::SubscriptionSuspended { .. } => {
            if !maybe_finalize_cancellation(record, now) {
                record.status = SubscriptionStatus::Suspended;
            }
        }
        BillingEvent::Ignored => {}
    }

    ensure_valid_transition(&before, record)?;

    Ok(*record != before)
}

/// Reject writes that would break the record invariants.
pub fn ensure_valid_transition(
    previous: &SubscriptionRecord,
    next: &SubscriptionRecord,
) -> Result<()> {
    next.check_invariants()
        .map_err(SubscriptionError::InvalidTransition)?;

    if previous.status.is_terminal()
        && (next.status != previous.status
            || next.plan_type != previous.plan_type
            || next.amount != previous.amount)
    {
        return Err(SubscriptionError::InvalidTransition(format!(
            "subscription {} is {} and cannot change",
            previous.id, previous.status
        )));
    }

    if previous.refund_processed_at.is_some()
        && next.refund_processed_at != previous.refund_processed_at
    {
        return Err(SubscriptionError::InvalidTransition(format!(
            "refund on subscription {} is already recorded",
            previous.id
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{active, amount, at, with_status};
    use crate::engine::plan_change::schedule_plan_change;
    use crate::models::{PaymentSucceeded, PlanType};
    use chrono::Duration;

    fn renewed(start: DateTime<Utc>, end: DateTime<Utc>) -> BillingEvent {
        BillingEvent::SubscriptionRenewed {
            provider_subscription_id: "sub_123".to_string(),
            period_start: start,
            period_end: end,
        }
    }

    fn paid(start: DateTime<Utc>, end: DateTime<Utc>) -> BillingEvent {
        BillingEvent::PaymentSucceeded(PaymentSucceeded {
            account_id: Some("acct-1".to_string()),
            plan_type: Some(PlanType::Monthly),
            provider_subscription_id: "sub_123".to_string(),
            period_start: start,
            period_end: end,
            amount: amount("79.00"),
        })
    }

    fn failed() -> BillingEvent {
        BillingEvent::PaymentFailed {
            account_id: None,
            provider_subscription_id: Some("sub_123".to_string()),
            amount: None,
        }
    }

    #[test]
    fn test_renewal_advances_period() {
        let catalog = PlanCatalog::default();
        let mut record = active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1));

        let changed =
            apply_event(&mut record, &renewed(at(2025, 12, 1), at(2026, 1, 1)), &catalog, at(2025, 12, 1)).unwrap();
        assert!(changed);
        assert_eq!(record.current_period_start, Some(at(2025, 12, 1)));
        assert_eq!(record.current_period_end, Some(at(2026, 1, 1)));
    }

    #[test]
    fn test_stale_renewal_does_not_rewind() {
        let catalog = PlanCatalog::default();
        let mut record = active(PlanType::Monthly, at(2025, 12, 1), at(2026, 1, 1));

        let changed =
            apply_event(&mut record, &renewed(at(2025, 11, 1), at(2025, 12, 1)), &catalog, at(2025, 12, 2)).unwrap();
        assert!(!changed);
        assert_eq!(record.current_period_end, Some(at(2026, 1, 1)));
    }

    #[test]
    fn test_same_renewal_twice_swaps_plan_once() {
        let catalog = PlanCatalog::default();
        let mut record = active(PlanType::Quarterly, at(2025, 9, 1), at(2025, 12, 1));
        schedule_plan_change(&mut record, PlanType::Monthly).unwrap();
        let event = renewed(at(2025, 12, 1), at(2026, 1, 1));

        assert!(apply_event(&mut record, &event, &catalog, at(2025, 12, 2)).unwrap());
        assert_eq!(record.plan_type, PlanType::Monthly);
        let after_first = record.clone();

        assert!(!apply_event(&mut record, &event, &catalog, at(2025, 12, 2)).unwrap());
        assert_eq!(record, after_first);
    }

    #[test]
    fn test_renewal_before_boundary_keeps_pending_change() {
        let catalog = PlanCatalog::default();
        let mut record = active(PlanType::Quarterly, at(2025, 9, 1), at(2025, 12, 1));
        schedule_plan_change(&mut record, PlanType::Monthly).unwrap();

        apply_event(&mut record, &renewed(at(2025, 9, 1), at(2025, 12, 1)), &catalog, at(2025, 11, 20)).unwrap();
        assert_eq!(record.plan_type, PlanType::Quarterly);
        assert!(record.pending_change.is_some());
    }

    #[test]
    fn test_renewal_after_cancel_boundary_finalizes_instead() {
        let catalog = PlanCatalog::default();
        let mut record = active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1));
        record.cancel_at_period_end = true;

        let now = at(2025, 12, 1) + Duration::hours(1);
        assert!(apply_event(&mut record, &renewed(at(2025, 12, 1), at(2026, 1, 1)), &catalog, now).unwrap());
        assert_eq!(record.status, SubscriptionStatus::Cancelled);
        assert_eq!(record.cancelled_at, Some(now));
        assert_eq!(record.current_period_end, Some(at(2025, 12, 1)));
    }

    #[test]
    fn test_first_payment_activates_pending_record() {
        let catalog = PlanCatalog::default();
        let mut record = with_status(
            active(PlanType::Annual, at(2025, 11, 1), at(2025, 11, 1)),
            SubscriptionStatus::Pending,
        );
        record.current_period_start = None;
        record.current_period_end = None;

        apply_event(&mut record, &paid(at(2025, 11, 2), at(2025, 12, 2)), &catalog, at(2025, 11, 2)).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.plan_type, PlanType::Monthly);
        assert_eq!(record.amount, amount("79.00"));
        assert_eq!(record.current_period_end, Some(at(2025, 12, 2)));
    }

    #[test]
    fn test_payment_failure_only_fails_pending_records() {
        let catalog = PlanCatalog::default();
        let now = at(2025, 11, 10);

        let mut pending = with_status(
            active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1)),
            SubscriptionStatus::Pending,
        );
        assert!(apply_event(&mut pending, &failed(), &catalog, now).unwrap());
        assert_eq!(pending.status, SubscriptionStatus::Failed);

        let mut current = active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1));
        assert!(!apply_event(&mut current, &failed(), &catalog, now).unwrap());
        assert_eq!(current.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_failed_record_recovers_on_payment() {
        let catalog = PlanCatalog::default();
        let mut record = with_status(
            active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1)),
            SubscriptionStatus::Failed,
        );
        apply_event(&mut record, &paid(at(2025, 12, 1), at(2026, 1, 1)), &catalog, at(2025, 12, 1)).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_terminal_records_never_change() {
        let catalog = PlanCatalog::default();
        let events = [
            paid(at(2026, 1, 1), at(2026, 2, 1)),
            renewed(at(2026, 1, 1), at(2026, 2, 1)),
            failed(),
            BillingEvent::SubscriptionCanceled {
                provider_subscription_id: "sub_123".to_string(),
            },
            BillingEvent::SubscriptionExpired {
                provider_subscription_id: "sub_123".to_string(),
            },
            BillingEvent::SubscriptionSuspended {
                provider_subscription_id: "sub_123".to_string(),
            },
        ];

        for status in [SubscriptionStatus::Cancelled, SubscriptionStatus::Expired] {
            let mut record = with_status(
                active(PlanType::Quarterly, at(2025, 9, 1), at(2025, 12, 1)),
                status,
            );
            record.pending_change = Some(crate::models::PendingPlanChange {
                plan_type: PlanType::Monthly,
                effective_at: at(2025, 12, 1),
            });
            let original = record.clone();

            for event in &events {
                assert!(!apply_event(&mut record, event, &catalog, at(2026, 1, 2)).unwrap());
            }
            assert_eq!(record, original);
        }
    }

    #[test]
    fn test_provider_cancel_and_expire() {
        let catalog = PlanCatalog::default();
        let now = at(2025, 11, 15);

        let mut record = active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1));
        apply_event(
            &mut record,
            &BillingEvent::SubscriptionCanceled {
                provider_subscription_id: "sub_123".to_string(),
            },
            &catalog,
            now,
        )
        .unwrap();
        assert_eq!(record.status, SubscriptionStatus::Cancelled);
        assert_eq!(record.cancelled_at, Some(now));

        let mut record = active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1));
        apply_event(
            &mut record,
            &BillingEvent::SubscriptionExpired {
                provider_subscription_id: "sub_123".to_string(),
            },
            &catalog,
            now,
        )
        .unwrap();
        assert_eq!(record.status, SubscriptionStatus::Expired);
        assert!(record.cancelled_at.is_none());
    }

    #[test]
    fn test_refund_timestamp_is_immutable() {
        let mut previous = active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1));
        previous.refund_processed_at = Some(at(2025, 11, 3));

        let mut next = previous.clone();
        next.refund_processed_at = Some(at(2025, 11, 4));
        assert!(ensure_valid_transition(&previous, &next).is_err());

        next.refund_processed_at = None;
        assert!(ensure_valid_transition(&previous, &next).is_err());
    }

    #[test]
    fn test_terminal_reactivation_is_rejected() {
        let previous = with_status(
            active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1)),
            SubscriptionStatus::Expired,
        );
        let mut next = previous.clone();
        next.status = SubscriptionStatus::Active;
        assert!(ensure_valid_transition(&previous, &next).is_err());
    }
}
