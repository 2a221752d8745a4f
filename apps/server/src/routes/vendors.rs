use axum::Json;
use axum::extract::{Path, Query, State};
use serde_json::{Value, json};
use uuid::Uuid;

use pricebot_core::Error;
use pricebot_store::vendors;

use crate::error::ApiResult;
use crate::routes::Pagination;
use crate::state::SharedState;

pub async fn list(
    State(state): State<SharedState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let limit = page.limit(50, 200);
    let offset = page.offset();
    let (rows, total) = state
        .store
        .with_conn(move |conn| vendors::list(conn, limit, offset))
        .await?;
    Ok(Json(json!({
        "vendors": rows,
        "total": total,
        "next_offset": page.next_offset(50, 200, total),
    })))
}

pub async fn detail(
    State(state): State<SharedState>,
    Path(vendor_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let vendor = state
        .store
        .with_conn(move |conn| {
            vendors::get(conn, vendor_id)?.ok_or_else(|| Error::not_found("vendor"))
        })
        .await?;
    Ok(Json(json!({ "vendor": vendor })))
}
