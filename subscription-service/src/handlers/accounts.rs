use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use service_core::error::AppError;
use validator::Validate;

use crate::models::{AccessResult, PlanType, Provider, SubscriptionRecord, TrialGrant};
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct TrialRequest {
    pub account_created_at: DateTime<Utc>,
    /// Overrides the configured trial length.
    pub trial_ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FreeMonthsRequest {
    #[validate(range(min = 1, max = 24, message = "months must be between 1 and 24"))]
    pub months: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "plan_type cannot be empty"))]
    pub plan_type: String,
    pub provider: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub provider_subscription_id: Option<String>,
}

pub(crate) fn parse_plan_type(raw: &str) -> Result<PlanType, AppError> {
    PlanType::parse(raw)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Unknown plan type '{}'", raw)))
}

fn parse_provider(raw: &str) -> Result<Provider, AppError> {
    Provider::parse(raw)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Unknown provider '{}'", raw)))
}

#[tracing::instrument(skip(state))]
pub async fn check_access(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<AccessResult>, AppError> {
    let result = state.service.check_access(&account_id).await?;
    Ok(Json(result))
}

#[tracing::instrument(skip(state, request))]
pub async fn put_trial(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(request): Json<TrialRequest>,
) -> Result<Json<TrialGrant>, AppError> {
    let grant = state
        .service
        .ensure_trial(&account_id, request.account_created_at, request.trial_ends_at)
        .await?;
    Ok(Json(grant))
}

#[tracing::instrument(skip(state, request))]
pub async fn grant_free_months(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(request): Json<FreeMonthsRequest>,
) -> Result<Json<TrialGrant>, AppError> {
    request.validate()?;

    let grant = state
        .service
        .grant_free_months(&account_id, request.months)
        .await?;
    Ok(Json(grant))
}

#[tracing::instrument(skip(state, request))]
pub async fn open_checkout(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<SubscriptionRecord>), AppError> {
    request.validate()?;

    let plan_type = parse_plan_type(&request.plan_type)?;
    let provider = request.provider.as_deref().map(parse_provider).transpose()?;

    let record = state
        .service
        .open_checkout(&account_id, plan_type, provider, request.provider_subscription_id)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}
