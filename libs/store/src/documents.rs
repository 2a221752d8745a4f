//! Source-document repository. Documents are created `pending` at upload
//! time, mutated by the job runner, and immutable once terminal.

use chrono::NaiveDateTime;
use rusqlite::{Connection, Row, params};
use serde_json::Value;
use uuid::Uuid;

use pricebot_core::Result;
use pricebot_core::{DocumentStatus, Error, SourceDocument};

use crate::map::{count_rows, db_err, json_col, parsed_col, uuid_col, uuid_col_opt};

const COLUMNS: &str = "id, vendor_id, original_filename, file_type, storage_uri, \
                       ingest_started_at, ingest_completed_at, status, metadata, created_at";

fn from_row(row: &Row) -> rusqlite::Result<SourceDocument> {
    Ok(SourceDocument {
        id: uuid_col(row, 0)?,
        vendor_id: uuid_col_opt(row, 1)?,
        original_filename: row.get(2)?,
        file_type: row.get(3)?,
        storage_uri: row.get(4)?,
        ingest_started_at: row.get(5)?,
        ingest_completed_at: row.get(6)?,
        status: parsed_col::<DocumentStatus>(row, 7)?,
        metadata: json_col(row, 8)?,
        created_at: row.get(9)?,
    })
}

pub fn insert(conn: &Connection, doc: &SourceDocument) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO source_documents ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            doc.id.to_string(),
            doc.vendor_id.map(|id| id.to_string()),
            doc.original_filename,
            doc.file_type,
            doc.storage_uri,
            doc.ingest_started_at,
            doc.ingest_completed_at,
            doc.status.as_str(),
            doc.metadata.to_string(),
            doc.created_at,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<SourceDocument>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM source_documents WHERE id = ?1"))
        .map_err(db_err)?;
    let mut rows = stmt
        .query_map(params![id.to_string()], from_row)
        .map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

pub fn list(conn: &Connection, limit: u32, offset: u32) -> Result<(Vec<SourceDocument>, u64)> {
    let total = count_rows(conn, "SELECT COUNT(*) FROM source_documents")?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM source_documents ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![limit, offset], from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok((rows, total))
}

/// Moves a pending document to `processing`, stamping the ingest start time.
pub fn mark_processing(conn: &Connection, id: Uuid, started_at: NaiveDateTime) -> Result<()> {
    transition(conn, id, DocumentStatus::Processing, |doc| {
        if doc.status.is_terminal() {
            return Err(Error::HistoryConflict(format!(
                "document {id} is already terminal ({})",
                doc.status
            )));
        }
        Ok(())
    })?;
    conn.execute(
        "UPDATE source_documents SET ingest_started_at = ?2 WHERE id = ?1",
        params![id.to_string(), started_at],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Moves a document into a terminal state, merging processor metadata and
/// stamping the completion time. Terminal documents are never re-opened.
pub fn mark_terminal(
    conn: &Connection,
    id: Uuid,
    status: DocumentStatus,
    metadata: &Value,
    completed_at: NaiveDateTime,
) -> Result<()> {
    debug_assert!(status.is_terminal());
    transition(conn, id, status, |doc| {
        if doc.status.is_terminal() {
            return Err(Error::HistoryConflict(format!(
                "document {id} is already terminal ({})",
                doc.status
            )));
        }
        Ok(())
    })?;
    conn.execute(
        "UPDATE source_documents SET metadata = ?2, ingest_completed_at = ?3 WHERE id = ?1",
        params![id.to_string(), metadata.to_string(), completed_at],
    )
    .map_err(db_err)?;
    Ok(())
}

fn transition(
    conn: &Connection,
    id: Uuid,
    to: DocumentStatus,
    check: impl FnOnce(&SourceDocument) -> Result<()>,
) -> Result<()> {
    let doc = get(conn, id)?.ok_or_else(|| Error::not_found("document"))?;
    check(&doc)?;
    conn.execute(
        "UPDATE source_documents SET status = ?2 WHERE id = ?1",
        params![id.to_string(), to.as_str()],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn delete(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute(
        "DELETE FROM source_documents WHERE id = ?1",
        params![id.to_string()],
    )
    .map_err(db_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use pricebot_core::timefmt;

    pub(crate) fn seed_document(conn: &Connection) -> SourceDocument {
        let now = timefmt::now();
        let doc = SourceDocument {
            id: Uuid::new_v4(),
            vendor_id: None,
            original_filename: "list.csv".into(),
            file_type: "csv".into(),
            storage_uri: "2025/03/abc-list.csv".into(),
            ingest_started_at: None,
            ingest_completed_at: None,
            status: DocumentStatus::Pending,
            metadata: serde_json::json!({}),
            created_at: now,
        };
        insert(conn, &doc).unwrap();
        doc
    }

    #[test]
    fn lifecycle_pending_processing_terminal() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn_sync(|conn| {
                let doc = seed_document(conn);
                let now = timefmt::now();
                mark_processing(conn, doc.id, now)?;
                assert_eq!(
                    get(conn, doc.id)?.unwrap().status,
                    DocumentStatus::Processing
                );
                mark_terminal(
                    conn,
                    doc.id,
                    DocumentStatus::Processed,
                    &serde_json::json!({"offers": 2}),
                    now,
                )?;
                let done = get(conn, doc.id)?.unwrap();
                assert_eq!(done.status, DocumentStatus::Processed);
                assert_eq!(done.metadata["offers"], 2);
                assert!(done.ingest_completed_at.is_some());

                // Terminal documents refuse further transitions.
                assert!(mark_processing(conn, doc.id, now).is_err());
                Ok(())
            })
            .unwrap();
    }
}
