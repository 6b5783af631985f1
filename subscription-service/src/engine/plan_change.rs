//! Deferred plan changes, applied once at the period boundary.

use crate::error::{Result, SubscriptionError};
use crate::models::{
    PendingPlanChange, PlanCatalog, PlanType, SubscriptionRecord, SubscriptionStatus,
};
use chrono::{DateTime, Utc};

/// Schedule `new_plan` to take effect at the end of the current period.
pub fn schedule_plan_change(record: &mut SubscriptionRecord, new_plan: PlanType) -> Result<()> {
    if new_plan == record.plan_type {
        return Err(SubscriptionError::InvalidTransition(format!(
            "subscription {} is already on the {} plan",
            record.id, new_plan
        )));
    }

    if !matches!(
        record.status,
        SubscriptionStatus::Active | SubscriptionStatus::Cancelled
    ) {
        return Err(SubscriptionError::InvalidTransition(format!(
            "cannot change plan of a {} subscription",
            record.status
        )));
    }

    let effective_at = record.current_period_end.ok_or_else(|| {
        SubscriptionError::InvalidTransition(format!(
            "subscription {} has no current period",
            record.id
        ))
    })?;

    record.pending_change = Some(PendingPlanChange {
        plan_type: new_plan,
        effective_at,
    });

    Ok(())
}

/// Swap in the pending plan if its effective time has passed.
///
/// Returns `true` when the record changed. Terminal records are left alone.
pub fn apply_due_plan_change(
    record: &mut SubscriptionRecord,
    catalog: &PlanCatalog,
    now: DateTime<Utc>,
) -> bool {
    if record.status.is_terminal() {
        return false;
    }

    let Some(pending) = record.pending_change else {
        return false;
    };

    if now < pending.effective_at {
        return false;
    }

    let plan = catalog.get_plan(pending.plan_type);
    record.plan_type = plan.plan_type;
    record.amount = plan.amount;
    record.pending_change = None;
    record.status = SubscriptionStatus::Active;

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{active, amount, at, with_status};

    #[test]
    fn test_schedule_sets_effective_at_to_period_end() {
        let mut record = active(PlanType::Quarterly, at(2025, 9, 1), at(2025, 12, 1));
        schedule_plan_change(&mut record, PlanType::Monthly).unwrap();

        assert_eq!(
            record.pending_change,
            Some(PendingPlanChange {
                plan_type: PlanType::Monthly,
                effective_at: at(2025, 12, 1),
            })
        );
        assert_eq!(record.plan_type, PlanType::Quarterly);
    }

    #[test]
    fn test_schedule_rejects_same_plan() {
        let mut record = active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1));
        let err = schedule_plan_change(&mut record, PlanType::Monthly).unwrap_err();
        assert!(matches!(err, SubscriptionError::InvalidTransition(_)));
    }

    #[test]
    fn test_schedule_rejects_non_active_statuses() {
        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Expired,
            SubscriptionStatus::Suspended,
            SubscriptionStatus::Failed,
        ] {
            let mut record = with_status(
                active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1)),
                status,
            );
            assert!(schedule_plan_change(&mut record, PlanType::Annual).is_err());
        }
    }

    #[test]
    fn test_deferred_downgrade_applies_only_after_boundary() {
        let catalog = PlanCatalog::default();
        let mut record = active(PlanType::Quarterly, at(2025, 9, 1), at(2025, 12, 1));
        schedule_plan_change(&mut record, PlanType::Monthly).unwrap();

        assert!(!apply_due_plan_change(&mut record, &catalog, at(2025, 11, 20)));
        assert_eq!(record.plan_type, PlanType::Quarterly);
        assert!(record.pending_change.is_some());

        assert!(apply_due_plan_change(&mut record, &catalog, at(2025, 12, 2)));
        assert_eq!(record.plan_type, PlanType::Monthly);
        assert_eq!(record.amount, amount("79.00"));
        assert!(record.pending_change.is_none());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let catalog = PlanCatalog::default();
        let mut record = active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1));
        schedule_plan_change(&mut record, PlanType::Annual).unwrap();

        assert!(apply_due_plan_change(&mut record, &catalog, at(2025, 12, 1)));
        let after_first = record.clone();
        assert!(!apply_due_plan_change(&mut record, &catalog, at(2025, 12, 1)));
        assert_eq!(record, after_first);
        assert_eq!(record.amount, amount("690.00"));
    }

    #[test]
    fn test_apply_uses_repriced_catalog() {
        let catalog = PlanCatalog::default().with_amount(PlanType::Annual, amount("650.00"));
        let mut record = active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1));
        schedule_plan_change(&mut record, PlanType::Annual).unwrap();

        apply_due_plan_change(&mut record, &catalog, at(2025, 12, 3));
        assert_eq!(record.amount, amount("650.00"));
    }

    #[test]
    fn test_apply_never_touches_terminal_record() {
        let catalog = PlanCatalog::default();
        let mut record = active(PlanType::Monthly, at(2025, 11, 1), at(2025, 12, 1));
        schedule_plan_change(&mut record, PlanType::Annual).unwrap();
        let mut record = with_status(record, SubscriptionStatus::Cancelled);

        assert!(!apply_due_plan_change(&mut record, &catalog, at(2026, 1, 1)));
        assert_eq!(record.plan_type, PlanType::Monthly);
    }
}
