//! Vendor repository.

use chrono::NaiveDateTime;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use pricebot_core::Vendor;
use pricebot_core::Result;

use crate::map::{count_rows, db_err, json_col, uuid_col};

const COLUMNS: &str = "id, name, contact_info, metadata, created_at, updated_at";

fn from_row(row: &Row) -> rusqlite::Result<Vendor> {
    Ok(Vendor {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        contact_info: json_col(row, 2)?,
        metadata: json_col(row, 3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn insert(conn: &Connection, vendor: &Vendor) -> Result<()> {
    conn.execute(
        "INSERT INTO vendors (id, name, contact_info, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            vendor.id.to_string(),
            vendor.name,
            vendor.contact_info.to_string(),
            vendor.metadata.to_string(),
            vendor.created_at,
            vendor.updated_at,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Vendor>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM vendors WHERE id = ?1"))
        .map_err(db_err)?;
    let mut rows = stmt
        .query_map(params![id.to_string()], from_row)
        .map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Vendor>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM vendors WHERE name = ?1 COLLATE NOCASE"
        ))
        .map_err(db_err)?;
    let mut rows = stmt.query_map(params![name.trim()], from_row).map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

/// Lazily creates the vendor on first reference. Returns `(vendor, created)`.
pub fn get_or_create(conn: &Connection, name: &str, now: NaiveDateTime) -> Result<(Vendor, bool)> {
    if let Some(existing) = find_by_name(conn, name)? {
        return Ok((existing, false));
    }
    let vendor = Vendor {
        id: Uuid::new_v4(),
        name: name.trim().to_string(),
        contact_info: serde_json::json!({}),
        metadata: serde_json::json!({}),
        created_at: now,
        updated_at: now,
    };
    insert(conn, &vendor)?;
    Ok((vendor, true))
}

pub fn list(conn: &Connection, limit: u32, offset: u32) -> Result<(Vec<Vendor>, u64)> {
    let total = count_rows(conn, "SELECT COUNT(*) FROM vendors")?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM vendors ORDER BY name COLLATE NOCASE LIMIT ?1 OFFSET ?2"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![limit, offset], from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok((rows, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use pricebot_core::timefmt;

    #[test]
    fn name_uniqueness_is_case_insensitive() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn_sync(|conn| {
                let now = timefmt::now();
                let (first, created) = get_or_create(conn, "TechSource", now)?;
                assert!(created);
                let found = find_by_name(conn, "techsource")?.expect("vendor");
                assert_eq!(found.id, first.id);
                let (_, created_again) = get_or_create(conn, " TECHSOURCE ", now)?;
                assert!(!created_again);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn list_orders_by_name() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn_sync(|conn| {
                let now = timefmt::now();
                get_or_create(conn, "zeta", now)?;
                get_or_create(conn, "Alpha", now)?;
                let (vendors, total) = list(conn, 10, 0)?;
                assert_eq!(total, 2);
                assert_eq!(vendors[0].name, "Alpha");
                Ok(())
            })
            .unwrap();
    }
}
