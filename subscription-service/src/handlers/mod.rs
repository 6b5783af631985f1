pub mod accounts;
pub mod health;
pub mod subscriptions;
pub mod webhooks;

pub use accounts::{check_access, grant_free_months, open_checkout, put_trial};
pub use health::{health_check, metrics_endpoint, readiness_check};
pub use subscriptions::{
    cancel_subscription, get_subscription, record_refund, refund_eligibility, schedule_plan_change,
};
pub use webhooks::{pagarme_webhook, stripe_webhook};
