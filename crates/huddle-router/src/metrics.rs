//! Router metrics for observability.
//!
//! Uses the global OpenTelemetry meter provider, which must be installed
//! by the host application. Without one, every instrument is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("huddle-router"))
}

// ============================================================================
// Counters
// ============================================================================

/// Counter for messages routed, by destination kind.
pub fn messages_routed() -> Counter<u64> {
    meter()
        .u64_counter("huddle.messages.routed")
        .with_description("Total chat messages routed")
        .with_unit("message")
        .build()
}

/// Counter for per-recipient delivery failures.
pub fn delivery_failures() -> Counter<u64> {
    meter()
        .u64_counter("huddle.delivery.failures")
        .with_description("Deliveries that could not be queued for a recipient")
        .with_unit("delivery")
        .build()
}

/// Counter for session registrations (handshakes).
pub fn sessions_registered() -> Counter<u64> {
    meter()
        .u64_counter("huddle.sessions.registered")
        .with_description("Total client sessions registered")
        .with_unit("session")
        .build()
}

// ============================================================================
// Gauges
// ============================================================================

/// Gauge for currently registered sessions.
pub fn sessions_active() -> Gauge<i64> {
    meter()
        .i64_gauge("huddle.sessions.active")
        .with_description("Current number of registered client sessions")
        .with_unit("session")
        .build()
}

// ============================================================================
// Histograms
// ============================================================================

/// Histogram for dispatch latency.
pub fn dispatch_latency() -> Histogram<f64> {
    meter()
        .f64_histogram("huddle.dispatch.latency")
        .with_description("Time spent routing one inbound message")
        .with_unit("ms")
        .build()
}

// ============================================================================
// Recording helpers
// ============================================================================

/// Record a routed message.
pub fn record_routed(kind: &str) {
    messages_routed().add(1, &[KeyValue::new("kind", kind.to_string())]);
}

/// Record a failed delivery.
pub fn record_delivery_failure(reason: &str) {
    delivery_failures().add(1, &[KeyValue::new("reason", reason.to_string())]);
}

/// Record several delivery failures sharing one reason.
pub fn record_delivery_failures(reason: &str, count: usize) {
    delivery_failures().add(count as u64, &[KeyValue::new("reason", reason.to_string())]);
}

/// Record a session registration and the resulting session count.
pub fn record_registration(active: usize) {
    sessions_registered().add(1, &[]);
    record_active_sessions(active);
}

/// Record the current number of registered sessions.
pub fn record_active_sessions(active: usize) {
    sessions_active().record(active as i64, &[]);
}

/// Record dispatch latency in milliseconds.
pub fn record_dispatch_latency(latency_ms: f64, kind: &str) {
    dispatch_latency().record(latency_ms, &[KeyValue::new("kind", kind.to_string())]);
}
