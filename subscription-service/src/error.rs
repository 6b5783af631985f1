//! Domain errors for subscription lifecycle operations.

use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The requested operation is illegal from the record's current state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Soft failure; callers proceed with locally known values.
    #[error("Provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("Concurrent update on subscription {0}")]
    ReconcileConflict(String),

    #[error("Webhook signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl SubscriptionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SubscriptionError::InvalidTransition(_) => "invalid_transition",
            SubscriptionError::NotFound(_) => "not_found",
            SubscriptionError::ProviderUnreachable(_) => "provider_unreachable",
            SubscriptionError::ReconcileConflict(_) => "reconcile_conflict",
            SubscriptionError::SignatureInvalid(_) => "signature_invalid",
            SubscriptionError::InvalidPayload(_) => "invalid_payload",
            SubscriptionError::Store(_) => "store",
        }
    }
}

impl From<SubscriptionError> for AppError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::InvalidTransition(msg) => {
                AppError::Conflict(anyhow::anyhow!("Invalid transition: {}", msg))
            }
            SubscriptionError::NotFound(what) => {
                AppError::NotFound(anyhow::anyhow!("{} not found", what))
            }
            SubscriptionError::ProviderUnreachable(msg) => AppError::BadGateway(msg),
            SubscriptionError::ReconcileConflict(id) => AppError::Conflict(anyhow::anyhow!(
                "Subscription {} was modified concurrently",
                id
            )),
            SubscriptionError::SignatureInvalid(msg) => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid webhook signature: {}", msg))
            }
            SubscriptionError::InvalidPayload(msg) => {
                AppError::BadRequest(anyhow::anyhow!("Invalid payload: {}", msg))
            }
            SubscriptionError::Store(inner) => inner,
        }
    }
}

pub type Result<T> = std::result::Result<T, SubscriptionError>;
