//! Metrics module for subscription-service.
//! Prometheus counters for webhook intake, reconciliation and access checks.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Store query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "subscription_db_query_duration_seconds",
            "Subscription store query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Webhook deliveries by provider and outcome
pub static WEBHOOKS_RECEIVED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Normalized events by provider and kind
pub static EVENTS_NORMALIZED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Reconciliation outcomes
pub static RECONCILE_OUTCOMES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Optimistic-concurrency write conflicts
pub static WRITE_CONFLICTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Provider lookups that fell back to local values
pub static SOFT_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Access checks by resulting status
pub static ACCESS_CHECKS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    WEBHOOKS_RECEIVED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_webhooks_received_total",
                "Webhook deliveries by provider and outcome"
            ),
            &["provider", "outcome"]
        )
        .expect("Failed to register WEBHOOKS_RECEIVED_TOTAL")
    });

    EVENTS_NORMALIZED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_events_normalized_total",
                "Normalized billing events by provider and kind"
            ),
            &["provider", "kind"]
        )
        .expect("Failed to register EVENTS_NORMALIZED_TOTAL")
    });

    RECONCILE_OUTCOMES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_reconcile_outcomes_total",
                "Reconciliation outcomes by event kind"
            ),
            &["kind", "outcome"]
        )
        .expect("Failed to register RECONCILE_OUTCOMES_TOTAL")
    });

    WRITE_CONFLICTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_write_conflicts_total",
                "Compare-and-set conflicts by operation"
            ),
            &["operation"]
        )
        .expect("Failed to register WRITE_CONFLICTS_TOTAL")
    });

    SOFT_FAILURES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_soft_failures_total",
                "Provider lookups that fell back to local values"
            ),
            &["source", "reason"]
        )
        .expect("Failed to register SOFT_FAILURES_TOTAL")
    });

    ACCESS_CHECKS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_access_checks_total",
                "Access checks by resulting status"
            ),
            &["status", "has_access"]
        )
        .expect("Failed to register ACCESS_CHECKS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format, HTTP recorder output first.
pub fn get_metrics() -> String {
    let mut output = service_core::middleware::metrics::render();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

pub fn record_webhook(provider: &str, outcome: &str) {
    if let Some(counter) = WEBHOOKS_RECEIVED_TOTAL.get() {
        counter.with_label_values(&[provider, outcome]).inc();
    }
}

pub fn record_normalized_event(provider: &str, kind: &str) {
    if let Some(counter) = EVENTS_NORMALIZED_TOTAL.get() {
        counter.with_label_values(&[provider, kind]).inc();
    }
}

pub fn record_reconcile_outcome(kind: &str, outcome: &str) {
    if let Some(counter) = RECONCILE_OUTCOMES_TOTAL.get() {
        counter.with_label_values(&[kind, outcome]).inc();
    }
}

pub fn record_write_conflict(operation: &str) {
    if let Some(counter) = WRITE_CONFLICTS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

pub fn record_soft_failure(source: &str, reason: &str) {
    if let Some(counter) = SOFT_FAILURES_TOTAL.get() {
        counter.with_label_values(&[source, reason]).inc();
    }
}

pub fn record_access_check(status: &str, has_access: bool) {
    if let Some(counter) = ACCESS_CHECKS_TOTAL.get() {
        counter
            .with_label_values(&[status, if has_access { "true" } else { "false" }])
            .inc();
    }
}
