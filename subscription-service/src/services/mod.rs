//! Services module for subscription-service.

pub mod database;
pub mod memory;
pub mod metrics;
pub mod plans;
pub mod reconciler;
pub mod store;
pub mod subscriptions;
pub mod sweep;

pub use database::PgSubscriptionStore;
pub use memory::InMemorySubscriptionStore;
pub use metrics::{get_metrics, init_metrics};
pub use plans::PlanResolver;
pub use reconciler::{ReconcileOutcome, Reconciler, SweepReport};
pub use store::{SubscriptionStore, WriteOutcome};
pub use subscriptions::SubscriptionService;
pub use sweep::spawn_lapse_sweep;
