//! Product and alias repository.

use chrono::NaiveDateTime;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use pricebot_core::Result;
use pricebot_core::{Product, ProductAlias};

use crate::map::{count_rows, db_err, decode_embedding, encode_embedding, json_col, uuid_col, uuid_col_opt};

const COLUMNS: &str = "id, canonical_name, brand, model_number, upc, category, specs, created_at, updated_at";
const ALIAS_COLUMNS: &str = "id, product_id, alias_text, source_vendor_id, embedding, created_at, updated_at";

fn from_row(row: &Row) -> rusqlite::Result<Product> {
    Ok(Product {
        id: uuid_col(row, 0)?,
        canonical_name: row.get(1)?,
        brand: row.get(2)?,
        model_number: row.get(3)?,
        upc: row.get(4)?,
        category: row.get(5)?,
        specs: json_col(row, 6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn alias_from_row(row: &Row) -> rusqlite::Result<ProductAlias> {
    let embedding: Option<Vec<u8>> = row.get(4)?;
    Ok(ProductAlias {
        id: uuid_col(row, 0)?,
        product_id: uuid_col(row, 1)?,
        alias_text: row.get(2)?,
        source_vendor_id: uuid_col_opt(row, 3)?,
        embedding: embedding.as_deref().and_then(decode_embedding),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn insert(conn: &Connection, product: &Product) -> Result<()> {
    conn.execute(
        "INSERT INTO products (id, canonical_name, brand, model_number, upc, category, specs, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            product.id.to_string(),
            product.canonical_name,
            product.brand,
            product.model_number,
            product.upc,
            product.category,
            product.specs.to_string(),
            product.created_at,
            product.updated_at,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Product>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM products WHERE id = ?1"))
        .map_err(db_err)?;
    let mut rows = stmt
        .query_map(params![id.to_string()], from_row)
        .map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

pub fn find_by_upc(conn: &Connection, upc: &str) -> Result<Option<Product>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM products WHERE upc = ?1"))
        .map_err(db_err)?;
    let mut rows = stmt.query_map(params![upc], from_row).map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

pub fn find_by_brand_model(conn: &Connection, brand: &str, model: &str) -> Result<Option<Product>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM products
             WHERE brand IS NOT NULL AND model_number IS NOT NULL
               AND lower(trim(brand)) = lower(trim(?1))
               AND lower(trim(model_number)) = lower(trim(?2))
             ORDER BY updated_at DESC LIMIT 1"
        ))
        .map_err(db_err)?;
    let mut rows = stmt.query_map(params![brand, model], from_row).map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

pub fn find_by_canonical_name(conn: &Connection, name: &str) -> Result<Option<Product>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM products
             WHERE canonical_name = ?1 COLLATE NOCASE
             ORDER BY updated_at DESC LIMIT 1"
        ))
        .map_err(db_err)?;
    let mut rows = stmt
        .query_map(params![name.trim()], from_row)
        .map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

pub fn list(conn: &Connection, limit: u32, offset: u32) -> Result<(Vec<Product>, u64)> {
    let total = count_rows(conn, "SELECT COUNT(*) FROM products")?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM products ORDER BY canonical_name COLLATE NOCASE LIMIT ?1 OFFSET ?2"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![limit, offset], from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok((rows, total))
}

/// Case-insensitive substring search across canonical name, model number,
/// UPC, and alias text. Results are deduped by product id, canonical-name
/// matches first.
pub fn search(conn: &Connection, query: &str, limit: u32, offset: u32) -> Result<(Vec<Product>, u64)> {
    let needle = format!("%{}%", query.trim());
    let sql_base = "FROM products p WHERE p.id IN (
            SELECT id FROM products
             WHERE canonical_name LIKE ?1 COLLATE NOCASE
                OR model_number LIKE ?1 COLLATE NOCASE
                OR upc LIKE ?1
            UNION
            SELECT product_id FROM product_aliases WHERE alias_text LIKE ?1 COLLATE NOCASE
         )";
    let total = conn
        .query_row(
            &format!("SELECT COUNT(*) {sql_base}"),
            params![needle],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n.max(0) as u64)
        .map_err(db_err)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} {sql_base} ORDER BY p.canonical_name COLLATE NOCASE LIMIT ?2 OFFSET ?3",
            COLUMNS
                .split(", ")
                .map(|c| format!("p.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![needle, limit, offset], from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok((rows, total))
}

/// Inserts an alias unless `(product, alias_text, source_vendor)` exists.
/// Returns true when a row was written.
pub fn insert_alias(conn: &Connection, alias: &ProductAlias) -> Result<bool> {
    let written = conn
        .execute(
            "INSERT OR IGNORE INTO product_aliases
             (id, product_id, alias_text, source_vendor_id, embedding, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                alias.id.to_string(),
                alias.product_id.to_string(),
                alias.alias_text,
                alias.source_vendor_id.map(|id| id.to_string()),
                alias.embedding.as_deref().map(encode_embedding),
                alias.created_at,
                alias.updated_at,
            ],
        )
        .map_err(db_err)?;
    Ok(written > 0)
}

/// Exact alias matches for a raw string. Vendor-scoped rows sort before
/// global ones, most recently updated first; the resolver takes the head.
pub fn find_alias_exact(
    conn: &Connection,
    alias_text: &str,
    vendor_id: Option<Uuid>,
) -> Result<Vec<ProductAlias>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ALIAS_COLUMNS} FROM product_aliases
             WHERE alias_text = ?1 COLLATE NOCASE
             ORDER BY CASE WHEN source_vendor_id = ?2 THEN 0
                           WHEN source_vendor_id IS NULL THEN 1
                           ELSE 2 END,
                      updated_at DESC"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(
            params![alias_text.trim(), vendor_id.map(|id| id.to_string())],
            alias_from_row,
        )
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

/// Most recently updated aliases that carry an embedding, capped at `limit`.
/// The fuzzy matcher scores these in memory.
pub fn aliases_with_embeddings(conn: &Connection, limit: usize) -> Result<Vec<ProductAlias>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ALIAS_COLUMNS} FROM product_aliases
             WHERE embedding IS NOT NULL
             ORDER BY updated_at DESC LIMIT ?1"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![limit as i64], alias_from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

pub fn aliases_for_product(conn: &Connection, product_id: Uuid) -> Result<Vec<ProductAlias>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ALIAS_COLUMNS} FROM product_aliases WHERE product_id = ?1 ORDER BY updated_at DESC"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![product_id.to_string()], alias_from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

pub fn new_product(name: &str, now: NaiveDateTime) -> Product {
    Product {
        id: Uuid::new_v4(),
        canonical_name: name.to_string(),
        brand: None,
        model_number: None,
        upc: None,
        category: None,
        specs: serde_json::json!({}),
        created_at: now,
        updated_at: now,
    }
}
