//! Application startup and lifecycle management.

use crate::clock::{Clock, SystemClock};
use crate::config::{StoreConfig, SubscriptionConfig};
use crate::handlers;
use crate::providers::{PagarmePriceSource, PriceSource};
use crate::services::{
    init_metrics, spawn_lapse_sweep, InMemorySubscriptionStore, PgSubscriptionStore,
    PlanResolver, Reconciler, SubscriptionService, SubscriptionStore,
};
use axum::{
    body::Body,
    middleware,
    routing::{get, post, put},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::metrics::{install_recorder, metrics_middleware};
use service_core::middleware::tracing::{make_request_span, request_id_middleware};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: SubscriptionConfig,
    pub store: Arc<dyn SubscriptionStore>,
    pub service: SubscriptionService,
    pub reconciler: Reconciler,
    pub clock: Arc<dyn Clock>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/webhooks/stripe", post(handlers::stripe_webhook))
        .route("/webhooks/pagarme", post(handlers::pagarme_webhook))
        .route("/accounts/:account_id/access", get(handlers::check_access))
        .route("/accounts/:account_id/trial", put(handlers::put_trial))
        .route(
            "/accounts/:account_id/free-months",
            post(handlers::grant_free_months),
        )
        .route("/accounts/:account_id/checkout", post(handlers::open_checkout))
        .route("/subscriptions/:id", get(handlers::get_subscription))
        .route(
            "/subscriptions/:id/cancel",
            post(handlers::cancel_subscription),
        )
        .route(
            "/subscriptions/:id/plan-change",
            post(handlers::schedule_plan_change),
        )
        .route(
            "/subscriptions/:id/refund-eligibility",
            get(handlers::refund_eligibility),
        )
        .route("/subscriptions/:id/refund", post(handlers::record_refund))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

impl Application {
    /// Build the application with the configured store and the wall clock.
    pub async fn build(config: SubscriptionConfig) -> Result<Self, AppError> {
        let store: Arc<dyn SubscriptionStore> = match &config.store {
            StoreConfig::Postgres(database) => {
                let store = PgSubscriptionStore::new(
                    database.url.expose_secret(),
                    database.max_connections,
                    database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;

                store.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;

                Arc::new(store)
            }
            StoreConfig::Memory => {
                tracing::warn!("Using in-memory store; subscriptions are lost on restart");
                Arc::new(InMemorySubscriptionStore::new())
            }
        };

        Self::build_with(config, store, Arc::new(SystemClock)).await
    }

    /// Build against an explicit store and clock.
    pub async fn build_with(
        config: SubscriptionConfig,
        store: Arc<dyn SubscriptionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        init_metrics();
        install_recorder();

        let price_source = config.pagarme_api.api_key.as_ref().map(|_| {
            Arc::new(PagarmePriceSource::new(config.pagarme_api.clone())) as Arc<dyn PriceSource>
        });
        let plans = PlanResolver::new(
            config.plans.catalog(),
            price_source,
            config.engine.provider_timeout,
        );

        let service = SubscriptionService::new(
            store.clone(),
            plans.clone(),
            clock.clone(),
            config.engine.trial_days,
        );
        let reconciler = Reconciler::new(store.clone(), plans, clock.clone());

        let addr = config.common.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Subscription service listener bound");

        Ok(Self {
            port,
            listener,
            state: AppState {
                config,
                store,
                service,
                reconciler,
                clock,
            },
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let sweep = spawn_lapse_sweep(
            self.state.reconciler.clone(),
            self.state.config.engine.sweep_interval,
        );

        tracing::info!(
            service = "subscription-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.listener, router(self.state)).await;

        if let Some(handle) = sweep {
            handle.abort();
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{EngineConfig, PagarmeApiConfig, PlansConfig, WebhookConfig};
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use secrecy::Secret;
    use service_core::config::Config as CoreConfig;
    use tower::ServiceExt;

    fn state() -> AppState {
        let config = SubscriptionConfig {
            common: CoreConfig::default(),
            service_name: "subscription-service".to_string(),
            service_version: "0.1.0".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            store: StoreConfig::Memory,
            webhooks: WebhookConfig {
                stripe_secret: Secret::new("whsec".to_string()),
                pagarme_secret: Secret::new("pagarme".to_string()),
                stripe_tolerance_secs: 300,
            },
            plans: PlansConfig::default(),
            pagarme_api: PagarmeApiConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                api_key: None,
            },
            engine: EngineConfig::default(),
        };

        let store: Arc<dyn SubscriptionStore> = Arc::new(InMemorySubscriptionStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap(),
        ));
        let plans = PlanResolver::new(config.plans.catalog(), None, config.engine.provider_timeout);

        AppState {
            service: SubscriptionService::new(store.clone(), plans.clone(), clock.clone(), 7),
            reconciler: Reconciler::new(store.clone(), plans, clock.clone()),
            config,
            store,
            clock,
        }
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_malformed_subscription_id_is_rejected() {
        let response = router(state())
            .oneshot(
                Request::builder()
                    .uri("/subscriptions/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_free_months_out_of_range_is_unprocessable() {
        let response = router(state())
            .oneshot(post("/accounts/U1/free-months", r#"{"months":0}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_checkout_opens_pending_record() {
        let state = state();
        let response = router(state.clone())
            .oneshot(post("/accounts/U1/checkout", r#"{"plan_type":"quarterly"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let stored = state.store.latest_pending_for_account("U1").await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_unsigned_webhook_is_unauthorized() {
        let response = router(state())
            .oneshot(post("/webhooks/pagarme", r#"{"type":"subscription.canceled"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
