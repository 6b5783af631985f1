//! Provider webhook intake.
//!
//! Signatures are checked against the raw body before anything is parsed.
//! Failures to parse or apply return 500 so the provider redelivers.

use axum::{extract::State, http::HeaderMap, Json};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use service_core::error::AppError;
use service_core::utils::signature::{verify_body_signature, verify_timestamped_signature};

use crate::error::SubscriptionError;
use crate::models::{Provider, ProviderEvent};
use crate::providers::{pagarme, stripe};
use crate::services::metrics::{record_normalized_event, record_webhook};
use crate::startup::AppState;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
const PAGARME_SIGNATURE_HEADERS: [&str; 2] = ["x-hub-signature", "x-pagarme-signature"];

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn reject_signature(provider: Provider, reason: &str) -> AppError {
    tracing::warn!(
        security_event = true,
        provider = %provider,
        reason,
        "Rejected webhook with invalid signature"
    );
    record_webhook(provider.as_str(), "signature_invalid");
    SubscriptionError::SignatureInvalid(reason.to_string()).into()
}

/// Anything past the signature check is retryable from the provider's side.
fn processing_failure(provider: Provider, err: SubscriptionError) -> AppError {
    tracing::error!(
        provider = %provider,
        kind = err.kind(),
        error = %err,
        "Webhook processing failed"
    );
    record_webhook(provider.as_str(), "failed");
    AppError::InternalError(anyhow::anyhow!("Webhook processing failed: {}", err))
}

async fn process(state: &AppState, event: ProviderEvent) -> Result<Json<Value>, AppError> {
    let provider = event.provider;
    record_normalized_event(provider.as_str(), event.event.kind());

    let outcome = state
        .reconciler
        .reconcile(&event)
        .await
        .map_err(|e| processing_failure(provider, e))?;

    tracing::info!(
        provider = %provider,
        event_type = %event.event_type,
        kind = event.event.kind(),
        outcome = outcome.as_str(),
        "Webhook processed"
    );
    record_webhook(provider.as_str(), outcome.as_str());

    Ok(Json(json!({ "received": true })))
}

/// Stripe webhook handler.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, AppError> {
    let signature = header(&headers, STRIPE_SIGNATURE_HEADER)
        .ok_or_else(|| reject_signature(Provider::Stripe, "missing Stripe-Signature header"))?;

    let now = state.clock.now();
    let is_valid = verify_timestamped_signature(
        state.config.webhooks.stripe_secret.expose_secret(),
        body.as_bytes(),
        signature,
        now.timestamp(),
        state.config.webhooks.stripe_tolerance_secs,
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Webhook signature verification error");
        AppError::InternalError(anyhow::anyhow!("Webhook verification failed"))
    })?;

    if !is_valid {
        return Err(reject_signature(Provider::Stripe, "signature mismatch or stale timestamp"));
    }

    let event = stripe::parse(&body)
        .and_then(|raw| stripe::normalize(&raw, now))
        .map_err(|e| processing_failure(Provider::Stripe, e))?;

    process(&state, event).await
}

/// Pagar.me webhook handler.
pub async fn pagarme_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, AppError> {
    let signature = PAGARME_SIGNATURE_HEADERS
        .iter()
        .find_map(|name| header(&headers, name))
        .ok_or_else(|| reject_signature(Provider::Pagarme, "missing signature header"))?;

    let is_valid = verify_body_signature(
        state.config.webhooks.pagarme_secret.expose_secret(),
        body.as_bytes(),
        signature,
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Webhook signature verification error");
        AppError::InternalError(anyhow::anyhow!("Webhook verification failed"))
    })?;

    if !is_valid {
        return Err(reject_signature(Provider::Pagarme, "signature mismatch"));
    }

    let now = state.clock.now();
    let event = pagarme::parse(&body)
        .and_then(|raw| pagarme::normalize(&raw, now))
        .map_err(|e| processing_failure(Provider::Pagarme, e))?;

    process(&state, event).await
}
