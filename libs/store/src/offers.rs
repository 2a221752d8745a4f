//! Offer repository.

use chrono::NaiveDateTime;
use rusqlite::{Connection, Row, ToSql, params};
use uuid::Uuid;

use pricebot_core::Offer;
use pricebot_core::Result;

use crate::map::{db_err, decimal_col, json_col_opt, uuid_col, uuid_col_opt};

const COLUMNS: &str = "id, product_id, vendor_id, source_document_id, captured_at, price, \
                       currency, quantity, condition, min_order_quantity, location, notes, \
                       raw_row, created_at";

fn from_row(row: &Row) -> rusqlite::Result<Offer> {
    Ok(Offer {
        id: uuid_col(row, 0)?,
        product_id: uuid_col(row, 1)?,
        vendor_id: uuid_col(row, 2)?,
        source_document_id: uuid_col_opt(row, 3)?,
        captured_at: row.get(4)?,
        price: decimal_col(row, 5)?,
        currency: row.get(6)?,
        quantity: row.get(7)?,
        condition: row.get(8)?,
        min_order_quantity: row.get(9)?,
        location: row.get(10)?,
        notes: row.get(11)?,
        raw_row: json_col_opt(row, 12)?,
        created_at: row.get(13)?,
    })
}

pub fn insert(conn: &Connection, offer: &Offer) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO offers ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            offer.id.to_string(),
            offer.product_id.to_string(),
            offer.vendor_id.to_string(),
            offer.source_document_id.map(|id| id.to_string()),
            offer.captured_at,
            offer.price.to_string(),
            offer.currency,
            offer.quantity,
            offer.condition,
            offer.min_order_quantity,
            offer.location,
            offer.notes,
            offer.raw_row.as_ref().map(|v| v.to_string()),
            offer.created_at,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Offer>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM offers WHERE id = ?1"))
        .map_err(db_err)?;
    let mut rows = stmt
        .query_map(params![id.to_string()], from_row)
        .map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

/// Read-path filter. All fields are optional and combine with AND.
#[derive(Debug, Clone, Default)]
pub struct OfferFilter {
    pub vendor_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub document_id: Option<Uuid>,
    pub since: Option<NaiveDateTime>,
    pub limit: u32,
}

pub fn list(conn: &Connection, filter: &OfferFilter) -> Result<Vec<Offer>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(vendor_id) = filter.vendor_id {
        args.push(Box::new(vendor_id.to_string()));
        clauses.push(format!("vendor_id = ?{}", args.len()));
    }
    if let Some(product_id) = filter.product_id {
        args.push(Box::new(product_id.to_string()));
        clauses.push(format!("product_id = ?{}", args.len()));
    }
    if let Some(document_id) = filter.document_id {
        args.push(Box::new(document_id.to_string()));
        clauses.push(format!("source_document_id = ?{}", args.len()));
    }
    if let Some(since) = filter.since {
        args.push(Box::new(since));
        clauses.push(format!("captured_at >= ?{}", args.len()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let limit = if filter.limit == 0 { 100 } else { filter.limit };
    args.push(Box::new(limit));
    let sql = format!(
        "SELECT {COLUMNS} FROM offers {where_sql} ORDER BY captured_at DESC LIMIT ?{}",
        args.len()
    );

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

/// All offers for one product; the best-price ranking happens in memory
/// because prices are stored as decimal strings.
pub fn for_product(conn: &Connection, product_id: Uuid) -> Result<Vec<Offer>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM offers WHERE product_id = ?1 ORDER BY captured_at DESC"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![product_id.to_string()], from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

/// Offers for one product that are still covered by the currently-open
/// price-history span of their `(product, vendor)` pair. An observation that
/// a later span has closed over is superseded and drops out here.
pub fn active_for_product(conn: &Connection, product_id: Uuid) -> Result<Vec<Offer>> {
    let columns = COLUMNS
        .split(',')
        .map(|c| format!("o.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {columns} FROM offers o
             JOIN price_history_spans s
               ON s.product_id = o.product_id
              AND s.vendor_id = o.vendor_id
              AND s.valid_to IS NULL
             WHERE o.product_id = ?1 AND o.captured_at >= s.valid_from
             ORDER BY o.captured_at DESC"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![product_id.to_string()], from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

pub fn count_for_document(conn: &Connection, document_id: Uuid) -> Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM offers WHERE source_document_id = ?1",
        params![document_id.to_string()],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n.max(0) as u64)
    .map_err(db_err)
}
