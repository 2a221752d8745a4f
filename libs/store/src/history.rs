//! Price-history span repository. The materialization algorithm lives in
//! `pricebot-ingest`; this module is plain row access.

use chrono::NaiveDateTime;
use rusqlite::{Connection, Row, params};
use rust_decimal::Decimal;
use uuid::Uuid;

use pricebot_core::PriceHistorySpan;
use pricebot_core::Result;

use crate::map::{db_err, decimal_col, uuid_col, uuid_col_opt};

const COLUMNS: &str = "id, product_id, vendor_id, price, currency, valid_from, valid_to, source_offer_id";

fn from_row(row: &Row) -> rusqlite::Result<PriceHistorySpan> {
    Ok(PriceHistorySpan {
        id: uuid_col(row, 0)?,
        product_id: uuid_col(row, 1)?,
        vendor_id: uuid_col(row, 2)?,
        price: decimal_col(row, 3)?,
        currency: row.get(4)?,
        valid_from: row.get(5)?,
        valid_to: row.get(6)?,
        source_offer_id: uuid_col_opt(row, 7)?,
    })
}

pub fn insert(conn: &Connection, span: &PriceHistorySpan) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO price_history_spans ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            span.id.to_string(),
            span.product_id.to_string(),
            span.vendor_id.to_string(),
            span.price.to_string(),
            span.currency,
            span.valid_from,
            span.valid_to,
            span.source_offer_id.map(|id| id.to_string()),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

/// All spans for one `(product, vendor)` pair, ordered by `valid_from`.
pub fn for_pair(conn: &Connection, product_id: Uuid, vendor_id: Uuid) -> Result<Vec<PriceHistorySpan>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM price_history_spans
             WHERE product_id = ?1 AND vendor_id = ?2 ORDER BY valid_from"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(
            params![product_id.to_string(), vendor_id.to_string()],
            from_row,
        )
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

pub fn for_product(conn: &Connection, product_id: Uuid, limit: u32) -> Result<Vec<PriceHistorySpan>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM price_history_spans
             WHERE product_id = ?1 ORDER BY valid_from LIMIT ?2"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![product_id.to_string(), limit], from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

pub fn for_vendor(conn: &Connection, vendor_id: Uuid, limit: u32) -> Result<Vec<PriceHistorySpan>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM price_history_spans
             WHERE vendor_id = ?1 ORDER BY valid_from LIMIT ?2"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![vendor_id.to_string(), limit], from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

pub fn set_valid_to(conn: &Connection, span_id: Uuid, valid_to: Option<NaiveDateTime>) -> Result<()> {
    conn.execute(
        "UPDATE price_history_spans SET valid_to = ?2 WHERE id = ?1",
        params![span_id.to_string(), valid_to],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn set_price(
    conn: &Connection,
    span_id: Uuid,
    price: Decimal,
    currency: &str,
    source_offer_id: Option<Uuid>,
) -> Result<()> {
    conn.execute(
        "UPDATE price_history_spans SET price = ?2, currency = ?3, source_offer_id = ?4 WHERE id = ?1",
        params![
            span_id.to_string(),
            price.to_string(),
            currency,
            source_offer_id.map(|id| id.to_string()),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn delete(conn: &Connection, span_id: Uuid) -> Result<()> {
    conn.execute(
        "DELETE FROM price_history_spans WHERE id = ?1",
        params![span_id.to_string()],
    )
    .map_err(db_err)?;
    Ok(())
}
