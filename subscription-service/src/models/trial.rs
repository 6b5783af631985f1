//! Trial grant model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Days appended to a trial per promotional free month.
pub const FREE_MONTH_DAYS: i64 = 30;

/// Per-account trial entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TrialGrant {
    pub account_id: String,
    pub trial_ends_at: DateTime<Utc>,
    pub free_months: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrialGrant {
    pub fn new(
        account_id: impl Into<String>,
        trial_ends_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            trial_ends_at,
            free_months: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Trial end including promotional months.
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.trial_ends_at + Duration::days(FREE_MONTH_DAYS * i64::from(self.free_months.max(0)))
    }
}
