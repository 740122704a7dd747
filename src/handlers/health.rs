use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::AppState;

pub async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let buffer_healthy = state.buffer.is_healthy().await;
    Json(json!({
        "status": if buffer_healthy { "ok" } else { "degraded" },
        "buffer": {
            "healthy": buffer_healthy,
            "size": state.buffer.size().await,
            "utilization": state.buffer.utilization().await,
            "accepted": state.buffer.accepted_count(),
            "dropped": state.buffer.dropped_count(),
        },
        "partitions": {
            "active": state.partitions.active_partition_count(),
        },
    }))
}
