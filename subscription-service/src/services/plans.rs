//! Plan catalog with optional live price lookup.

use crate::models::{PlanCatalog, PlanType};
use crate::providers::PriceSource;
use crate::services::metrics::record_soft_failure;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Resolves plan prices, preferring the provider's current price and falling
/// back to the local catalog when the lookup fails or takes too long.
#[derive(Clone)]
pub struct PlanResolver {
    catalog: PlanCatalog,
    price_source: Option<Arc<dyn PriceSource>>,
    timeout: Duration,
}

impl PlanResolver {
    pub fn new(
        catalog: PlanCatalog,
        price_source: Option<Arc<dyn PriceSource>>,
        timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            price_source,
            timeout,
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Current price of `plan_type`. Never fails.
    pub async fn resolve_amount(&self, plan_type: PlanType) -> Decimal {
        let plan = self.catalog.get_plan(plan_type);
        let Some(source) = self.price_source.as_ref() else {
            return plan.amount;
        };

        match tokio::time::timeout(self.timeout, source.fetch_price(plan)).await {
            Ok(Ok(Some(amount))) if amount > Decimal::ZERO => amount,
            Ok(Ok(_)) => plan.amount,
            Ok(Err(e)) => {
                warn!(
                    plan_type = %plan_type,
                    error = %e,
                    "Plan price lookup failed, using catalog amount"
                );
                record_soft_failure("plan_price", e.kind());
                plan.amount
            }
            Err(_) => {
                warn!(
                    plan_type = %plan_type,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Plan price lookup timed out, using catalog amount"
                );
                record_soft_failure("plan_price", "timeout");
                plan.amount
            }
        }
    }

    /// Catalog to apply a due plan change with, repriced for the target plan.
    pub async fn catalog_for(&self, plan_type: PlanType) -> PlanCatalog {
        let amount = self.resolve_amount(plan_type).await;
        self.catalog.with_amount(plan_type, amount)
    }
}
