//! Row/column mapping helpers shared by the repository modules.

use rusqlite::types::Type;
use rusqlite::{Error as SqlError, Row};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use pricebot_core::{Error, Result};

pub(crate) fn db_err(err: rusqlite::Error) -> Error {
    Error::storage(err)
}

fn conversion(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> SqlError {
    SqlError::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_col(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|err| conversion(idx, err))
}

pub(crate) fn uuid_col_opt(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| Uuid::parse_str(&raw).map_err(|err| conversion(idx, err)))
        .transpose()
}

pub(crate) fn json_col(row: &Row, idx: usize) -> rusqlite::Result<Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|err| conversion(idx, err))
}

pub(crate) fn json_col_opt(row: &Row, idx: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| serde_json::from_str(&raw).map_err(|err| conversion(idx, err)))
        .transpose()
}

pub(crate) fn decimal_col(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse::<Decimal>().map_err(|err| conversion(idx, err))
}

pub(crate) fn parsed_col<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|err| conversion(idx, std::io::Error::other(err)))
}

/// Aliases and query embeddings are dense little-endian f32 vectors.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(raw: &[u8]) -> Option<Vec<f32>> {
    if raw.is_empty() || raw.len() % 4 != 0 {
        return None;
    }
    Some(
        raw.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

pub(crate) fn count_rows(conn: &rusqlite::Connection, sql: &str) -> Result<u64> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|n| n.max(0) as u64)
        .map_err(db_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.75];
        assert_eq!(decode_embedding(&encode_embedding(&v)), Some(v));
        assert_eq!(decode_embedding(&[1, 2, 3]), None);
        assert_eq!(decode_embedding(&[]), None);
    }
}
