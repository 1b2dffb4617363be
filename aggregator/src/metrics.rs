//! Prometheus metrics for the gueststack server

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};
use tracing::warn;

// ── Session control ──────────────────────────────────────────────────────────

pub static CONTROL_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gueststack_control_total",
        "Session control requests",
        &["op", "status"]
    )
    .unwrap()
});

// ── Flame graphs ─────────────────────────────────────────────────────────────

pub static STACKS_READ: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "gueststack_stacks_read_total",
        "Stacks parsed from the sample buffers"
    )
    .unwrap()
});

pub static COLLAPSE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "gueststack_collapse_duration_seconds",
        "Time spent collapsing stacks",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap()
});

pub static RENDER_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gueststack_render_total",
        "Flame graph requests by outcome",
        &["kind", "status"]
    )
    .unwrap()
});

/// Count one control request
pub fn record_control(op: &str, ok: bool) {
    CONTROL_TOTAL
        .with_label_values(&[op, if ok { "ok" } else { "error" }])
        .inc();
}

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        warn!("Encoding metrics failed: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
