//! Provider-neutral billing events.

use super::plan::PlanType;
use super::subscription::Provider;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// First or recurring payment confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSucceeded {
    pub account_id: Option<String>,
    pub plan_type: Option<PlanType>,
    pub provider_subscription_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub amount: Decimal,
}

/// The closed vocabulary every provider payload is mapped into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    PaymentSucceeded(PaymentSucceeded),
    PaymentFailed {
        account_id: Option<String>,
        provider_subscription_id: Option<String>,
        amount: Option<Decimal>,
    },
    SubscriptionRenewed {
        provider_subscription_id: String,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    },
    SubscriptionCanceled {
        provider_subscription_id: String,
    },
    SubscriptionExpired {
        provider_subscription_id: String,
    },
    SubscriptionSuspended {
        provider_subscription_id: String,
    },
    /// Recognised delivery that carries no state change.
    Ignored,
}

impl BillingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BillingEvent::PaymentSucceeded(_) => "payment_succeeded",
            BillingEvent::PaymentFailed { .. } => "payment_failed",
            BillingEvent::SubscriptionRenewed { .. } => "subscription_renewed",
            BillingEvent::SubscriptionCanceled { .. } => "subscription_canceled",
            BillingEvent::SubscriptionExpired { .. } => "subscription_expired",
            BillingEvent::SubscriptionSuspended { .. } => "subscription_suspended",
            BillingEvent::Ignored => "ignored",
        }
    }

    pub fn provider_subscription_id(&self) -> Option<&str> {
        match self {
            BillingEvent::PaymentSucceeded(p) => Some(&p.provider_subscription_id),
            BillingEvent::PaymentFailed {
                provider_subscription_id,
                ..
            } => provider_subscription_id.as_deref(),
            BillingEvent::SubscriptionRenewed {
                provider_subscription_id,
                ..
            }
            | BillingEvent::SubscriptionCanceled {
                provider_subscription_id,
            }
            | BillingEvent::SubscriptionExpired {
                provider_subscription_id,
            }
            | BillingEvent::SubscriptionSuspended {
                provider_subscription_id,
            } => Some(provider_subscription_id),
            BillingEvent::Ignored => None,
        }
    }

    pub fn account_id(&self) -> Option<&str> {
        match self {
            BillingEvent::PaymentSucceeded(p) => p.account_id.as_deref(),
            BillingEvent::PaymentFailed { account_id, .. } => account_id.as_deref(),
            _ => None,
        }
    }

    /// Events that move money; these are never dropped silently.
    pub fn affects_money(&self) -> bool {
        matches!(
            self,
            BillingEvent::PaymentSucceeded(_) | BillingEvent::PaymentFailed { .. }
        )
    }

    /// Events that trigger the period-boundary checks.
    pub fn is_renewal_class(&self) -> bool {
        matches!(
            self,
            BillingEvent::PaymentSucceeded(_) | BillingEvent::SubscriptionRenewed { .. }
        )
    }
}

/// A normalized event with its delivery context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub provider: Provider,
    /// Raw provider event name, kept for logs.
    pub event_type: String,
    pub event: BillingEvent,
}

impl ProviderEvent {
    pub fn new(provider: Provider, event_type: impl Into<String>, event: BillingEvent) -> Self {
        Self {
            provider,
            event_type: event_type.into(),
            event,
        }
    }
}
