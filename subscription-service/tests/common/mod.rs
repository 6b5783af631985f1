//! Test helper module for subscription-service integration tests.
//!
//! Spawns the real application on a random port with the in-memory store and
//! a manual clock, so tests can move time across period boundaries.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Response};
use secrecy::Secret;
use serde_json::Value;
use service_core::config::Config as CoreConfig;
use service_core::utils::signature::{hmac_sha256_hex, sign_timestamped};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use subscription_service::clock::ManualClock;
use subscription_service::config::{
    EngineConfig, PagarmeApiConfig, PlansConfig, StoreConfig, SubscriptionConfig, WebhookConfig,
};
use subscription_service::services::{InMemorySubscriptionStore, SubscriptionStore};
use subscription_service::startup::Application;

pub const STRIPE_SECRET: &str = "whsec_test_secret";
pub const PAGARME_SECRET: &str = "pagarme_test_secret";

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

pub fn test_config() -> SubscriptionConfig {
    SubscriptionConfig {
        common: CoreConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0, // Random port
        },
        service_name: "subscription-service-test".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        store: StoreConfig::Memory,
        webhooks: WebhookConfig {
            stripe_secret: Secret::new(STRIPE_SECRET.to_string()),
            pagarme_secret: Secret::new(PAGARME_SECRET.to_string()),
            stripe_tolerance_secs: 300,
        },
        plans: PlansConfig::default(),
        pagarme_api: PagarmeApiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: None,
        },
        engine: EngineConfig::default(),
    }
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemorySubscriptionStore>,
    pub client: Client,
}

impl TestApp {
    /// Spawn a new test application with the clock pinned at `now`.
    pub async fn spawn_at(now: DateTime<Utc>) -> Self {
        Self::spawn_with(test_config(), now).await
    }

    pub async fn spawn() -> Self {
        Self::spawn_at(at(2025, 11, 1)).await
    }

    pub async fn spawn_with(config: SubscriptionConfig, now: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(InMemorySubscriptionStore::new());

        let app = Application::build_with(config, store.clone(), clock.clone())
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            clock,
            store,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn post_stripe(&self, event: &Value) -> Response {
        let body = event.to_string();
        let signature = sign_timestamped(
            STRIPE_SECRET,
            self.clock_now().timestamp(),
            body.as_bytes(),
        )
        .unwrap();

        self.client
            .post(self.url("/webhooks/stripe"))
            .header("stripe-signature", signature)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_pagarme(&self, event: &Value) -> Response {
        let body = event.to_string();
        let signature = hmac_sha256_hex(PAGARME_SECRET, body.as_bytes()).unwrap();

        self.client
            .post(self.url("/webhooks/pagarme"))
            .header("x-hub-signature", format!("sha256={}", signature))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_json(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> (u16, Value) {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn put_json(&self, path: &str, body: &Value) -> (u16, Value) {
        let response = self
            .client
            .put(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use subscription_service::clock::Clock;
        self.clock.now()
    }

    /// Id of the stored record linked to `provider_subscription_id`.
    pub async fn subscription_id(&self, provider_subscription_id: &str) -> String {
        self.store
            .find_by_provider_subscription_id(provider_subscription_id)
            .await
            .unwrap()
            .expect("subscription not stored")
            .id
            .to_string()
    }
}

/// Pagar.me `invoice.payment_succeeded` for a subscription's first cycle.
pub fn pagarme_first_payment(
    subscription_id: &str,
    account_id: &str,
    plan: &str,
    cents: i64,
    start: &str,
    end: &str,
) -> Value {
    serde_json::json!({
        "type": "invoice.payment_succeeded",
        "data": {
            "id": format!("in_{}", subscription_id),
            "amount": cents,
            "subscription": {
                "id": subscription_id,
                "metadata": { "user_id": account_id, "plan_type": plan }
            },
            "cycle": { "status": "billed", "start_at": start, "end_at": end }
        }
    })
}

/// Pagar.me `subscription.renewed` with a billed cycle.
pub fn pagarme_renewed(subscription_id: &str, start: &str, end: &str) -> Value {
    serde_json::json!({
        "type": "subscription.renewed",
        "data": {
            "id": subscription_id,
            "status": "active",
            "current_cycle": { "status": "billed", "start_at": start, "end_at": end }
        }
    })
}
