//! Operator routes, basic-auth gated outside the local environment.

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use pricebot_core::Error;
use pricebot_store::{vendors, whatsapp};

use crate::error::ApiResult;
use crate::state::SharedState;

pub async fn diagnostics(State(state): State<SharedState>) -> Json<Value> {
    let mut snapshot = state.metrics.snapshot();
    snapshot["jobs_queue_depth"] = json!(state.jobs.queue_depth());
    snapshot["debounce_pending"] = json!(state.debouncer.pending());
    snapshot["environment"] = json!(state.config.environment);
    Json(snapshot)
}

#[derive(Debug, Deserialize)]
pub struct MapVendorRequest {
    pub vendor_id: Option<Uuid>,
}

/// Points a WhatsApp chat at a vendor (or clears the mapping) so debounced
/// extraction can attribute its offers.
pub async fn map_chat_vendor(
    State(state): State<SharedState>,
    Path(chat_id): Path<Uuid>,
    Json(request): Json<MapVendorRequest>,
) -> ApiResult<Json<Value>> {
    let chat = state
        .store
        .with_conn(move |conn| {
            if let Some(vendor_id) = request.vendor_id {
                vendors::get(conn, vendor_id)?.ok_or_else(|| Error::not_found("vendor"))?;
            }
            whatsapp::set_chat_vendor(conn, chat_id, request.vendor_id)?;
            whatsapp::get_chat(conn, chat_id)?.ok_or_else(|| Error::not_found("chat"))
        })
        .await?;
    Ok(Json(json!({ "chat": chat })))
}
