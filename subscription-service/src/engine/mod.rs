//! Pure subscription rules. Nothing here touches the store, the network or
//! the wall clock; every function receives `now` explicitly.

pub mod access;
pub mod cancellation;
pub mod plan_change;
pub mod refund;
pub mod transitions;

pub use access::evaluate_access;
pub use cancellation::{cancel_immediately, maybe_finalize_cancellation, request_cancellation};
pub use plan_change::{apply_due_plan_change, schedule_plan_change};
pub use refund::{check_eligibility, days_used, RefundEligibility, REFUND_WINDOW_DAYS};
pub use transitions::{apply_event, ensure_valid_transition};

use chrono::{DateTime, Duration, Utc};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Whole days covering `duration`, rounded up. Negative spans count as zero.
pub fn ceil_days(duration: Duration) -> i64 {
    let millis = duration.num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}

/// Next optimistic-concurrency revision; strictly greater than `previous`.
pub fn next_revision(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    now.max(previous + Duration::microseconds(1))
}
