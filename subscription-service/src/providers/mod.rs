//! Provider payload normalization and provider API clients.
//!
//! Raw webhook bodies are mapped into [`BillingEvent`](crate::models::BillingEvent)
//! here; nothing past this module sees provider-specific shapes.

pub mod pagarme;
pub mod price;
pub mod stripe;

pub use price::{PagarmePriceSource, PriceSource};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

/// Convert an integer amount in cents to a currency amount.
pub(crate) fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Provider ids arrive as strings or numbers depending on API version.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
