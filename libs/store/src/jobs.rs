//! Ingestion-job repository.

use chrono::NaiveDateTime;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use pricebot_core::Result;
use pricebot_core::{Error, IngestionJob, JobLogEntry, JobStatus};

use crate::map::{db_err, parsed_col, uuid_col};

const COLUMNS: &str = "id, source_document_id, processor, status, logs, created_at, updated_at";

fn from_row(row: &Row) -> rusqlite::Result<IngestionJob> {
    let logs_raw: String = row.get(4)?;
    let logs: Vec<JobLogEntry> = serde_json::from_str(&logs_raw).unwrap_or_default();
    Ok(IngestionJob {
        id: uuid_col(row, 0)?,
        source_document_id: uuid_col(row, 1)?,
        processor: row.get(2)?,
        status: parsed_col::<JobStatus>(row, 3)?,
        logs,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn insert(conn: &Connection, job: &IngestionJob) -> Result<()> {
    let logs = serde_json::to_string(&job.logs).map_err(Error::storage)?;
    conn.execute(
        &format!("INSERT INTO ingestion_jobs ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            job.id.to_string(),
            job.source_document_id.to_string(),
            job.processor,
            job.status.as_str(),
            logs,
            job.created_at,
            job.updated_at,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<IngestionJob>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM ingestion_jobs WHERE id = ?1"))
        .map_err(db_err)?;
    let mut rows = stmt
        .query_map(params![id.to_string()], from_row)
        .map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

/// Replaces status and appends log entries in one update.
pub fn update(
    conn: &Connection,
    id: Uuid,
    status: JobStatus,
    new_logs: &[JobLogEntry],
    now: NaiveDateTime,
) -> Result<()> {
    let mut job = get(conn, id)?.ok_or_else(|| Error::not_found("job"))?;
    job.logs.extend_from_slice(new_logs);
    let logs = serde_json::to_string(&job.logs).map_err(Error::storage)?;
    conn.execute(
        "UPDATE ingestion_jobs SET status = ?2, logs = ?3, updated_at = ?4 WHERE id = ?1",
        params![id.to_string(), status.as_str(), logs, now],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Jobs still marked `running` whose last update is older than the cutoff.
/// These are casualties of a hard shutdown; startup reconciliation fails them.
pub fn stale_running(conn: &Connection, cutoff: NaiveDateTime) -> Result<Vec<IngestionJob>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM ingestion_jobs WHERE status = 'running' AND updated_at < ?1"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![cutoff], from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

pub fn new_job(document_id: Uuid, processor: Option<String>, now: NaiveDateTime) -> IngestionJob {
    IngestionJob {
        id: Uuid::new_v4(),
        source_document_id: document_id,
        processor,
        status: JobStatus::Queued,
        logs: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}
