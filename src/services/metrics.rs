use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};

lazy_static! {
    // ── Event counters (increment on each event) ────────────────────────────
    pub static ref NOTIFICATIONS_CREATED: CounterVec = register_counter_vec!(
        "api_notifications_created_total",
        "Notifications created, by ward",
        &["ward"]
    ).unwrap();

    pub static ref FANOUT_COUNTER: CounterVec = register_counter_vec!(
        "api_fanout_total",
        "Topic fanout attempts, by kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    pub static ref RESPONSES_COUNTER: CounterVec = register_counter_vec!(
        "api_responses_total",
        "Customer responses submitted, by value",
        &["value"]
    ).unwrap();

    pub static ref WARD_CHANGES_COUNTER: CounterVec = register_counter_vec!(
        "api_ward_changes_total",
        "Customer ward reassignments, by outcome",
        &["outcome"]
    ).unwrap();
}

/// Render the registry in the Prometheus text exposition format.
pub fn render() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("metrics encode failed: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
