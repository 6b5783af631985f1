use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

use super::accounts::parse_plan_type;
use crate::engine::RefundEligibility;
use crate::models::SubscriptionRecord;
use crate::startup::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub immediate: bool,
}

#[derive(Debug, Deserialize)]
pub struct PlanChangeRequest {
    pub plan_type: String,
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionRecord>, AppError> {
    Ok(Json(state.service.get(id).await?))
}

impl CancelRequest {
    /// An empty body means a period-end cancel. Anything else must parse,
    /// whatever the declared content type.
    pub fn from_body(body: &[u8]) -> Result<Self, AppError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid cancel request: {}", e)))
    }
}

/// Cancel a subscription. Without `immediate`, access continues to the end
/// of the paid period and only the local flag is set.
#[tracing::instrument(skip(state, body))]
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<SubscriptionRecord>, AppError> {
    let request = CancelRequest::from_body(&body)?;
    let record = state.service.cancel(id, request.immediate).await?;
    Ok(Json(record))
}

#[tracing::instrument(skip(state, request))]
pub async fn schedule_plan_change(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PlanChangeRequest>,
) -> Result<Json<SubscriptionRecord>, AppError> {
    let plan_type = parse_plan_type(&request.plan_type)?;
    let record = state.service.schedule_plan_change(id, plan_type).await?;
    Ok(Json(record))
}

pub async fn refund_eligibility(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RefundEligibility>, AppError> {
    Ok(Json(state.service.refund_eligibility(id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn record_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionRecord>, AppError> {
    Ok(Json(state.service.record_refund(id).await?))
}
