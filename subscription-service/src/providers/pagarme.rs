//! Pagar.me webhook normalization.
//!
//! Handles the v5 envelope (`{"type": ..., "data": {...}}`) and the legacy
//! postback format keyed by `object`.

use super::{from_cents, id_string, parse_timestamp};
use crate::error::{Result, SubscriptionError};
use crate::models::{
    BillingEvent, PaymentSucceeded, PlanType, Provider, ProviderEvent, SubscriptionStatus,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Cycle {
    status: Option<String>,
    start_at: Option<String>,
    end_at: Option<String>,
}

/// The fields we read from subscriptions, invoices, orders and charges.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Resource {
    id: Value,
    status: Option<String>,
    amount: Option<i64>,
    metadata: Option<HashMap<String, Value>>,
    current_cycle: Option<Cycle>,
    cycle: Option<Cycle>,
    current_period_start: Option<String>,
    current_period_end: Option<String>,
    start_at: Option<String>,
    next_billing_at: Option<String>,
    subscription_id: Value,
    subscription: Option<Box<Resource>>,
    invoice: Option<Box<Resource>>,
}

impl Resource {
    fn id(&self) -> Option<String> {
        id_string(&self.id)
    }

    fn meta(&self, key: &str) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(id_string)
    }

    fn account_id(&self) -> Option<String> {
        self.meta("user_id").or_else(|| {
            self.subscription
                .as_ref()
                .and_then(|s| s.meta("user_id"))
        })
    }

    fn plan_type(&self) -> Option<PlanType> {
        self.meta("plan_type")
            .or_else(|| self.meta("plan_id"))
            .or_else(|| self.subscription.as_ref().and_then(|s| s.meta("plan_type")))
            .map(|p| PlanType::from_string(&p))
    }

    /// Subscription id for invoices, charges and orders that belong to one.
    fn owning_subscription_id(&self) -> Option<String> {
        id_string(&self.subscription_id)
            .or_else(|| self.subscription.as_ref().and_then(|s| s.id()))
            .or_else(|| {
                self.invoice
                    .as_ref()
                    .and_then(|i| i.owning_subscription_id())
            })
    }

    fn active_cycle(&self) -> Option<&Cycle> {
        self.current_cycle.as_ref().or(self.cycle.as_ref())
    }

    fn period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let cycle = self.active_cycle();
        let start = cycle
            .and_then(|c| c.start_at.as_deref())
            .or(self.current_period_start.as_deref())
            .or(self.start_at.as_deref())
            .and_then(parse_timestamp)?;
        let end = cycle
            .and_then(|c| c.end_at.as_deref())
            .or(self.current_period_end.as_deref())
            .or(self.next_billing_at.as_deref())
            .and_then(parse_timestamp)?;
        Some((start, end))
    }

    fn amount(&self) -> Option<rust_decimal::Decimal> {
        self.amount.map(from_cents)
    }
}

fn map_top_status(status: &str) -> SubscriptionStatus {
    match status.to_ascii_lowercase().as_str() {
        "active" => SubscriptionStatus::Active,
        "canceled" | "cancelled" => SubscriptionStatus::Cancelled,
        "expired" => SubscriptionStatus::Expired,
        "suspended" => SubscriptionStatus::Suspended,
        "failed" => SubscriptionStatus::Failed,
        _ => SubscriptionStatus::Pending,
    }
}

/// Combine the subscription's top-level status with its current cycle.
///
/// The cycle is trusted first; a top-level cancelled or expired status
/// always wins, and the top-level status is only consulted on its own when
/// there is no cycle at all.
pub fn resolve_status(
    top_level: Option<&str>,
    cycle: Option<&str>,
    has_cycle: bool,
) -> SubscriptionStatus {
    let mut resolved = match cycle {
        Some("billed") => SubscriptionStatus::Active,
        Some("unpaid") | Some("failed") => SubscriptionStatus::Failed,
        _ => SubscriptionStatus::Pending,
    };

    if let Some(top) = top_level.map(map_top_status) {
        if top.is_terminal() {
            resolved = top;
        } else if resolved == SubscriptionStatus::Pending && !has_cycle {
            resolved = top;
        }
    }

    resolved
}

fn required_id(resource: &Resource, event_type: &str) -> Result<String> {
    resource.id().ok_or_else(|| {
        SubscriptionError::InvalidPayload(format!("{} payload has no id", event_type))
    })
}

fn payment_succeeded(
    resource: &Resource,
    provider_subscription_id: String,
    occurred_at: DateTime<Utc>,
) -> BillingEvent {
    let plan_type = resource.plan_type();
    let (period_start, period_end) = resource.period().unwrap_or_else(|| {
        let plan = plan_type.unwrap_or(PlanType::Monthly);
        (occurred_at, plan.period_end_from(occurred_at))
    });

    BillingEvent::PaymentSucceeded(PaymentSucceeded {
        account_id: resource.account_id(),
        plan_type,
        provider_subscription_id,
        period_start,
        period_end,
        amount: resource.amount().unwrap_or_default(),
    })
}

/// Map a subscription snapshot through the status resolution rules.
fn subscription_snapshot(
    subscription: &Resource,
    provider_subscription_id: String,
    renewal: bool,
    occurred_at: DateTime<Utc>,
) -> BillingEvent {
    let cycle = subscription.active_cycle();
    let status = resolve_status(
        subscription.status.as_deref(),
        cycle.and_then(|c| c.status.as_deref()),
        cycle.is_some(),
    );

    match status {
        SubscriptionStatus::Active if renewal => match subscription.period() {
            Some((period_start, period_end)) => BillingEvent::SubscriptionRenewed {
                provider_subscription_id,
                period_start,
                period_end,
            },
            None => BillingEvent::Ignored,
        },
        SubscriptionStatus::Active => {
            payment_succeeded(subscription, provider_subscription_id, occurred_at)
        }
        SubscriptionStatus::Failed => BillingEvent::PaymentFailed {
            account_id: subscription.account_id(),
            provider_subscription_id: Some(provider_subscription_id),
            amount: subscription.amount(),
        },
        SubscriptionStatus::Cancelled => BillingEvent::SubscriptionCanceled {
            provider_subscription_id,
        },
        SubscriptionStatus::Expired => BillingEvent::SubscriptionExpired {
            provider_subscription_id,
        },
        SubscriptionStatus::Suspended => BillingEvent::SubscriptionSuspended {
            provider_subscription_id,
        },
        SubscriptionStatus::Pending => BillingEvent::Ignored,
    }
}

/// Parse a raw Pagar.me body.
pub fn parse(body: &str) -> Result<Value> {
    serde_json::from_str(body)
        .map_err(|e| SubscriptionError::InvalidPayload(format!("invalid Pagar.me event: {}", e)))
}

/// Map a Pagar.me delivery into the internal vocabulary.
pub fn normalize(body: &Value, received_at: DateTime<Utc>) -> Result<ProviderEvent> {
    if let Some(object) = body.get("object").and_then(Value::as_str) {
        return normalize_postback(object, body, received_at);
    }

    let event_type = body
        .get("type")
        .or_else(|| body.get("event"))
        .and_then(Value::as_str)
        .ok_or_else(|| SubscriptionError::InvalidPayload("event type missing".to_string()))?
        .to_string();

    let occurred_at = body
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    let data = body.get("data").unwrap_or(body);
    let resource: Resource = serde_json::from_value(data.clone()).map_err(|e| {
        SubscriptionError::InvalidPayload(format!("malformed {} data: {}", event_type, e))
    })?;

    let event = match event_type.as_str() {
        "order.paid" | "charge.paid" => {
            let id = match resource.owning_subscription_id() {
                Some(id) => id,
                None => required_id(&resource, &event_type)?,
            };
            payment_succeeded(&resource, id, occurred_at)
        }
        "order.payment_failed" | "charge.failed" => BillingEvent::PaymentFailed {
            account_id: resource.account_id(),
            provider_subscription_id: resource.owning_subscription_id().or_else(|| resource.id()),
            amount: resource.amount(),
        },
        "subscription.activated" | "subscription.payment_succeeded" => {
            let id = required_id(&resource, &event_type)?;
            subscription_snapshot(&resource, id, false, occurred_at)
        }
        "subscription.renewed" => {
            let id = required_id(&resource, &event_type)?;
            subscription_snapshot(&resource, id, true, occurred_at)
        }
        "subscription.payment_failed" => BillingEvent::PaymentFailed {
            account_id: resource.account_id(),
            provider_subscription_id: Some(required_id(&resource, &event_type)?),
            amount: resource.amount(),
        },
        "subscription.canceled" | "subscription.cancelled" => BillingEvent::SubscriptionCanceled {
            provider_subscription_id: required_id(&resource, &event_type)?,
        },
        "subscription.expired" => BillingEvent::SubscriptionExpired {
            provider_subscription_id: required_id(&resource, &event_type)?,
        },
        "invoice.payment_succeeded" | "invoice.paid" => match resource.owning_subscription_id() {
            Some(id) => payment_succeeded(&resource, id, occurred_at),
            None => BillingEvent::Ignored,
        },
        "invoice.payment_failed" => BillingEvent::PaymentFailed {
            account_id: resource.account_id(),
            provider_subscription_id: resource.owning_subscription_id(),
            amount: resource.amount(),
        },
        _ => BillingEvent::Ignored,
    };

    Ok(ProviderEvent::new(Provider::Pagarme, event_type, event))
}

fn normalize_postback(
    object: &str,
    body: &Value,
    received_at: DateTime<Utc>,
) -> Result<ProviderEvent> {
    let event_type = body
        .get("event")
        .and_then(Value::as_str)
        .map(|e| format!("postback.{}", e))
        .unwrap_or_else(|| format!("postback.{}", object));

    let event = match object {
        "subscription" => {
            let subscription: Resource = serde_json::from_value(
                body.get("subscription").unwrap_or(body).clone(),
            )
            .map_err(|e| SubscriptionError::InvalidPayload(format!("malformed postback: {}", e)))?;
            let status = subscription
                .status
                .as_deref()
                .or_else(|| body.get("current_status").and_then(Value::as_str))
                .map(map_top_status);
            let id = required_id(&subscription, &event_type)?;

            match status {
                Some(SubscriptionStatus::Active) => match subscription.period() {
                    Some((period_start, period_end)) => BillingEvent::SubscriptionRenewed {
                        provider_subscription_id: id,
                        period_start,
                        period_end,
                    },
                    None => BillingEvent::Ignored,
                },
                Some(SubscriptionStatus::Cancelled) => BillingEvent::SubscriptionCanceled {
                    provider_subscription_id: id,
                },
                Some(SubscriptionStatus::Expired) => BillingEvent::SubscriptionExpired {
                    provider_subscription_id: id,
                },
                Some(SubscriptionStatus::Suspended) => BillingEvent::SubscriptionSuspended {
                    provider_subscription_id: id,
                },
                _ => BillingEvent::Ignored,
            }
        }
        "transaction" => {
            let transaction: Resource = serde_json::from_value(
                body.get("transaction").unwrap_or(body).clone(),
            )
            .map_err(|e| SubscriptionError::InvalidPayload(format!("malformed postback: {}", e)))?;
            let status = transaction
                .status
                .as_deref()
                .or_else(|| body.get("current_status").and_then(Value::as_str));

            match (status, transaction.subscription.as_deref()) {
                (Some("paid"), Some(subscription)) => match subscription.id() {
                    Some(id) => payment_succeeded(subscription, id, received_at),
                    None => BillingEvent::Ignored,
                },
                (Some("refused"), Some(subscription)) => BillingEvent::PaymentFailed {
                    account_id: subscription.account_id(),
                    provider_subscription_id: subscription.id(),
                    amount: transaction.amount(),
                },
                _ => BillingEvent::Ignored,
            }
        }
        _ => BillingEvent::Ignored,
    };

    Ok(ProviderEvent::new(Provider::Pagarme, event_type, event))
}
