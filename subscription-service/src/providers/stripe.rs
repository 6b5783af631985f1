//! Stripe webhook normalization.

use super::{from_cents, from_unix};
use crate::error::{Result, SubscriptionError};
use crate::models::{BillingEvent, PaymentSucceeded, PlanType, Provider, ProviderEvent};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;

/// Stripe event envelope.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: Option<i64>,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CheckoutSession {
    id: String,
    mode: Option<String>,
    payment_status: Option<String>,
    subscription: Option<String>,
    amount_total: Option<i64>,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Invoice {
    subscription: Option<String>,
    amount_paid: Option<i64>,
    amount_due: Option<i64>,
    period_start: Option<i64>,
    period_end: Option<i64>,
    lines: Option<InvoiceLines>,
    subscription_details: Option<SubscriptionDetails>,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InvoiceLines {
    data: Vec<InvoiceLine>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InvoiceLine {
    period: Option<LinePeriod>,
}

#[derive(Debug, Deserialize)]
struct LinePeriod {
    start: i64,
    end: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SubscriptionDetails {
    metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Subscription {
    id: String,
    status: String,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

fn object<T: DeserializeOwned>(event: &StripeEvent) -> Result<T> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        SubscriptionError::InvalidPayload(format!(
            "malformed {} object: {}",
            event.event_type, e
        ))
    })
}

fn plan_from(metadata: &HashMap<String, String>) -> Option<PlanType> {
    metadata.get("plan_type").map(|p| PlanType::from_string(p))
}

/// Parse a raw Stripe body into an event envelope.
pub fn parse(body: &str) -> Result<StripeEvent> {
    serde_json::from_str(body)
        .map_err(|e| SubscriptionError::InvalidPayload(format!("invalid Stripe event: {}", e)))
}

/// Map a Stripe event into the internal vocabulary.
///
/// `received_at` stands in for the event time when Stripe omits `created`.
pub fn normalize(event: &StripeEvent, received_at: DateTime<Utc>) -> Result<ProviderEvent> {
    let occurred_at = event.created.and_then(from_unix).unwrap_or(received_at);

    let normalized = match event.event_type.as_str() {
        "checkout.session.completed" => checkout_completed(object(event)?, occurred_at),
        "invoice.paid" | "invoice.payment_succeeded" => invoice_paid(object(event)?, occurred_at),
        "invoice.payment_failed" => invoice_failed(object(event)?),
        "customer.subscription.created" | "customer.subscription.updated" => {
            subscription_changed(object(event)?)
        }
        "customer.subscription.deleted" => {
            let subscription: Subscription = object(event)?;
            BillingEvent::SubscriptionCanceled {
                provider_subscription_id: subscription.id,
            }
        }
        _ => BillingEvent::Ignored,
    };

    Ok(ProviderEvent::new(
        Provider::Stripe,
        event.event_type.clone(),
        normalized,
    ))
}

fn checkout_completed(session: CheckoutSession, occurred_at: DateTime<Utc>) -> BillingEvent {
    if session.payment_status.as_deref() != Some("paid") {
        tracing::debug!(
            session_id = %session.id,
            mode = ?session.mode,
            payment_status = ?session.payment_status,
            "Checkout session completed without payment"
        );
        return BillingEvent::Ignored;
    }

    let plan_type = plan_from(&session.metadata).unwrap_or(PlanType::Monthly);

    BillingEvent::PaymentSucceeded(PaymentSucceeded {
        account_id: session.metadata.get("user_id").cloned(),
        plan_type: Some(plan_type),
        provider_subscription_id: session.subscription.unwrap_or(session.id),
        period_start: occurred_at,
        period_end: plan_type.period_end_from(occurred_at),
        amount: session.amount_total.map(from_cents).unwrap_or_default(),
    })
}

fn invoice_metadata(invoice: &Invoice) -> &HashMap<String, String> {
    match &invoice.subscription_details {
        Some(details) if !details.metadata.is_empty() => &details.metadata,
        _ => &invoice.metadata,
    }
}

fn invoice_paid(invoice: Invoice, occurred_at: DateTime<Utc>) -> BillingEvent {
    let Some(subscription_id) = invoice.subscription.clone() else {
        return BillingEvent::Ignored;
    };

    let metadata = invoice_metadata(&invoice);
    let plan_type = plan_from(metadata);

    // Line items carry the subscription period; the invoice's own period
    // fields describe the previous cycle for renewals.
    let line_period = invoice
        .lines
        .as_ref()
        .and_then(|lines| lines.data.iter().find_map(|line| line.period.as_ref()))
        .and_then(|p| Some((from_unix(p.start)?, from_unix(p.end)?)));
    let invoice_period = invoice
        .period_start
        .zip(invoice.period_end)
        .filter(|(start, end)| end > start)
        .and_then(|(start, end)| Some((from_unix(start)?, from_unix(end)?)));

    let (period_start, period_end) = line_period.or(invoice_period).unwrap_or_else(|| {
        let plan = plan_type.unwrap_or(PlanType::Monthly);
        (occurred_at, plan.period_end_from(occurred_at))
    });

    BillingEvent::PaymentSucceeded(PaymentSucceeded {
        account_id: metadata.get("user_id").cloned(),
        plan_type,
        provider_subscription_id: subscription_id,
        period_start,
        period_end,
        amount: invoice.amount_paid.map(from_cents).unwrap_or_default(),
    })
}

fn invoice_failed(invoice: Invoice) -> BillingEvent {
    let metadata = invoice_metadata(&invoice);
    BillingEvent::PaymentFailed {
        account_id: metadata.get("user_id").cloned(),
        provider_subscription_id: invoice.subscription.clone(),
        amount: invoice.amount_due.map(from_cents),
    }
}

fn subscription_changed(subscription: Subscription) -> BillingEvent {
    let provider_subscription_id = subscription.id;

    match subscription.status.as_str() {
        "active" | "trialing" => {
            let period = subscription
                .current_period_start
                .and_then(from_unix)
                .zip(subscription.current_period_end.and_then(from_unix));
            match period {
                Some((period_start, period_end)) => BillingEvent::SubscriptionRenewed {
                    provider_subscription_id,
                    period_start,
                    period_end,
                },
                None => BillingEvent::Ignored,
            }
        }
        "canceled" => BillingEvent::SubscriptionCanceled {
            provider_subscription_id,
        },
        "incomplete_expired" => BillingEvent::SubscriptionExpired {
            provider_subscription_id,
        },
        "unpaid" | "paused" => BillingEvent::SubscriptionSuspended {
            provider_subscription_id,
        },
        // past_due and incomplete are retried by Stripe; wait for the outcome.
        _ => BillingEvent::Ignored,
    }
}
