use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::state::SharedState;

/// Counter snapshot plus the recent-failure ring and queue gauges.
pub async fn metrics(State(state): State<SharedState>) -> Json<Value> {
    let mut snapshot = state.metrics.snapshot();
    snapshot["jobs_queue_depth"] = json!(state.jobs.queue_depth());
    snapshot["debounce_pending"] = json!(state.debouncer.pending());
    Json(snapshot)
}
