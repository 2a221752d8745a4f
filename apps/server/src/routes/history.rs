use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use pricebot_core::Error;
use pricebot_store::{history, products, vendors};

use crate::error::ApiResult;
use crate::state::SharedState;

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

pub async fn for_product(
    State(state): State<SharedState>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let spans = state
        .store
        .with_conn(move |conn| {
            products::get(conn, product_id)?.ok_or_else(|| Error::not_found("product"))?;
            history::for_product(conn, product_id, limit)
        })
        .await?;
    Ok(Json(json!({ "spans": spans })))
}

pub async fn for_vendor(
    State(state): State<SharedState>,
    Path(vendor_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let spans = state
        .store
        .with_conn(move |conn| {
            vendors::get(conn, vendor_id)?.ok_or_else(|| Error::not_found("vendor"))?;
            history::for_vendor(conn, vendor_id, limit)
        })
        .await?;
    Ok(Json(json!({ "spans": spans })))
}
