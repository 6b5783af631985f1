//! Domain models for subscription-service.

mod access;
mod event;
mod plan;
mod subscription;
mod trial;

pub use access::{AccessReason, AccessResult, AccessStatus};
pub use event::{BillingEvent, PaymentSucceeded, ProviderEvent};
pub use plan::{Plan, PlanCatalog, PlanType};
pub use subscription::{
    PendingPlanChange, Provider, SubscriptionRecord, SubscriptionRow, SubscriptionStatus,
};
pub use trial::{TrialGrant, FREE_MONTH_DAYS};
