//! Live plan price lookup.

use super::from_cents;
use crate::config::PagarmeApiConfig;
use crate::error::{Result, SubscriptionError};
use crate::models::Plan;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;

/// Source of the current price of a plan at the payment provider.
///
/// `Ok(None)` means the provider has no price for the plan and the catalog
/// amount applies.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self, plan: &Plan) -> Result<Option<Decimal>>;
}

/// Reads plan prices from the Pagar.me plans API.
#[derive(Clone)]
pub struct PagarmePriceSource {
    client: Client,
    config: PagarmeApiConfig,
}

#[derive(Debug, Deserialize)]
struct PagarmePlan {
    #[serde(default)]
    items: Vec<PagarmePlanItem>,
}

#[derive(Debug, Deserialize)]
struct PagarmePlanItem {
    pricing_scheme: Option<PricingScheme>,
}

#[derive(Debug, Deserialize)]
struct PricingScheme {
    price: Option<i64>,
}

impl PagarmePriceSource {
    pub fn new(config: PagarmeApiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn is_configured(&self) -> bool {
        self.config
            .api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().is_empty())
    }
}

#[async_trait]
impl PriceSource for PagarmePriceSource {
    #[tracing::instrument(skip(self, plan), fields(plan_type = %plan.plan_type))]
    async fn fetch_price(&self, plan: &Plan) -> Result<Option<Decimal>> {
        let Some(provider_plan_id) = plan.provider_plan_id.as_deref() else {
            return Ok(None);
        };
        let Some(api_key) = self.config.api_key.as_ref().filter(|_| self.is_configured()) else {
            return Ok(None);
        };

        let url = format!(
            "{}/plans/{}",
            self.config.base_url.trim_end_matches('/'),
            provider_plan_id
        );

        let response = self
            .client
            .get(&url)
            .basic_auth(api_key.expose_secret(), Some(""))
            .send()
            .await
            .map_err(|e| SubscriptionError::ProviderUnreachable(format!("Pagar.me: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SubscriptionError::ProviderUnreachable(format!(
                "Pagar.me plan lookup returned {}",
                status
            )));
        }

        let body: PagarmePlan = response.json().await.map_err(|e| {
            SubscriptionError::ProviderUnreachable(format!("unreadable Pagar.me plan: {}", e))
        })?;

        let price = body
            .items
            .first()
            .and_then(|item| item.pricing_scheme.as_ref())
            .and_then(|scheme| scheme.price)
            .map(from_cents);

        tracing::debug!(provider_plan_id, price = ?price, "Fetched plan price");
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanType;
    use secrecy::Secret;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> PagarmePriceSource {
        PagarmePriceSource::new(PagarmeApiConfig {
            base_url: server.uri(),
            api_key: Some(Secret::new("sk_test".to_string())),
        })
    }

    fn plan(provider_plan_id: Option<&str>) -> Plan {
        Plan {
            plan_type: PlanType::Quarterly,
            amount: PlanType::Quarterly.default_amount(),
            provider_plan_id: provider_plan_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_reads_first_item_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plans/plan_q"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "plan_q",
                "items": [{ "pricing_scheme": { "price": 21900 } }]
            })))
            .mount(&server)
            .await;

        let price = source(&server).fetch_price(&plan(Some("plan_q"))).await.unwrap();
        assert_eq!(price, Some(Decimal::new(21900, 2)));
    }

    #[tokio::test]
    async fn test_plan_without_provider_id_skips_lookup() {
        let server = MockServer::start().await;
        let price = source(&server).fetch_price(&plan(None)).await.unwrap();
        assert_eq!(price, None);
    }

    #[tokio::test]
    async fn test_error_status_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = source(&server).fetch_price(&plan(Some("plan_q"))).await;
        assert!(matches!(result, Err(SubscriptionError::ProviderUnreachable(_))));
    }
}
