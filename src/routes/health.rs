use axum::Json;
use serde_json::{json, Value};

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Prometheus text exposition.
pub async fn metrics() -> String {
    crate::services::metrics::render()
}
