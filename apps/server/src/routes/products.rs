use axum::Json;
use axum::extract::{Path, Query, State};
use serde_json::{Value, json};
use uuid::Uuid;

use pricebot_core::Error;
use pricebot_store::products;

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
        .with_conn(move |conn| products::list(conn, limit, offset))
        .await?;
    Ok(Json(json!({
        "products": rows,
        "total": total,
        "next_offset": page.next_offset(50, 200, total),
    })))
}

pub async fn detail(
    State(state): State<SharedState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let (product, aliases) = state
        .store
        .with_conn(move |conn| {
            let product =
                products::get(conn, product_id)?.ok_or_else(|| Error::not_found("product"))?;
            let aliases = products::aliases_for_product(conn, product_id)?;
            Ok((product, aliases))
        })
        .await?;
    Ok(Json(json!({ "product": product, "aliases": aliases })))
}
