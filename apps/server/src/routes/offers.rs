use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use pricebot_core::{Error, timefmt};
use pricebot_store::offers;

use crate::error::ApiResult;
use crate::state::SharedState;

#[derive(Debug, Deserialize, Default)]
pub struct OfferQuery {
    pub vendor_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub document_id: Option<Uuid>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

pub async fn list(
    State(state): State<SharedState>,
    Query(query): Query<OfferQuery>,
) -> ApiResult<Json<Value>> {
    let since = match query.since.as_deref() {
        Some(raw) => Some(
            timefmt::parse_wire(raw)
                .ok_or_else(|| Error::invalid(format!("invalid since timestamp: {raw}")))?,
        ),
        None => None,
    };
    let filter = offers::OfferFilter {
        vendor_id: query.vendor_id,
        product_id: query.product_id,
        document_id: query.document_id,
        since,
        limit: query.limit.unwrap_or(100).clamp(1, 500),
    };
    let rows = state
        .store
        .with_conn(move |conn| offers::list(conn, &filter))
        .await?;
    Ok(Json(json!({ "offers": rows })))
}
