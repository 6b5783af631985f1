//! Plan model and catalog.

use chrono::{DateTime, Days, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Billing interval offered to accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Monthly,
    Quarterly,
    Annual,
}

impl PlanType {
    pub const ALL: [PlanType; 3] = [PlanType::Monthly, PlanType::Quarterly, PlanType::Annual];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Monthly => "monthly",
            PlanType::Quarterly => "quarterly",
            PlanType::Annual => "annual",
        }
    }

    /// Strict parse; `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Some(PlanType::Monthly),
            "quarterly" => Some(PlanType::Quarterly),
            "annual" | "yearly" => Some(PlanType::Annual),
            _ => None,
        }
    }

    /// Lenient parse used on provider metadata: unknown values become monthly.
    pub fn from_string(s: &str) -> Self {
        Self::parse(s).unwrap_or(PlanType::Monthly)
    }

    pub fn months(&self) -> u32 {
        match self {
            PlanType::Monthly => 1,
            PlanType::Quarterly => 3,
            PlanType::Annual => 12,
        }
    }

    /// End of one billing interval starting at `start`.
    pub fn period_end_from(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_months(Months::new(self.months()))
            .or_else(|| start.checked_add_days(Days::new(30 * u64::from(self.months()))))
            .unwrap_or(start)
    }

    pub fn default_amount(&self) -> Decimal {
        match self {
            PlanType::Monthly => Decimal::new(7900, 2),
            PlanType::Quarterly => Decimal::new(19900, 2),
            PlanType::Annual => Decimal::new(69000, 2),
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchasable plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_type: PlanType,
    pub amount: Decimal,
    pub provider_plan_id: Option<String>,
}

/// Static catalog with one entry per plan type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    monthly: Plan,
    quarterly: Plan,
    annual: Plan,
}

impl PlanCatalog {
    pub fn new(
        monthly: (Decimal, Option<String>),
        quarterly: (Decimal, Option<String>),
        annual: (Decimal, Option<String>),
    ) -> Self {
        let plan = |plan_type, (amount, provider_plan_id): (Decimal, Option<String>)| Plan {
            plan_type,
            amount,
            provider_plan_id,
        };

        Self {
            monthly: plan(PlanType::Monthly, monthly),
            quarterly: plan(PlanType::Quarterly, quarterly),
            annual: plan(PlanType::Annual, annual),
        }
    }

    pub fn get_plan(&self, plan_type: PlanType) -> &Plan {
        match plan_type {
            PlanType::Monthly => &self.monthly,
            PlanType::Quarterly => &self.quarterly,
            PlanType::Annual => &self.annual,
        }
    }

    pub fn plans(&self) -> [&Plan; 3] {
        [&self.monthly, &self.quarterly, &self.annual]
    }

    /// Copy of the catalog with one plan repriced.
    pub fn with_amount(&self, plan_type: PlanType, amount: Decimal) -> Self {
        let mut catalog = self.clone();
        let plan = match plan_type {
            PlanType::Monthly => &mut catalog.monthly,
            PlanType::Quarterly => &mut catalog.quarterly,
            PlanType::Annual => &mut catalog.annual,
        };
        plan.amount = amount;
        catalog
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(
            (PlanType::Monthly.default_amount(), None),
            (PlanType::Quarterly.default_amount(), None),
            (PlanType::Annual.default_amount(), None),
        )
    }
}
