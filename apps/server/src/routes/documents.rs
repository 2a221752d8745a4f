//! Upload intake and document/job read paths.

use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use pricebot_core::{
    DocumentStatus, Error, SourceDocument, storage_key, timefmt,
};
use pricebot_store::{documents, jobs as job_repo, offers, vendors};
use pricebot_telemetry::counter;

use crate::error::{ApiError, ApiResult, bad_request};
use crate::jobs::{JobRequest, document_offer_count, job_summary};
use crate::routes::Pagination;
use crate::state::SharedState;

/// The canonical spreadsheet layout vendors are asked to fill in.
const VENDOR_PRICE_TEMPLATE: &str = "\
MODEL/SKU,DESCRIPTION,PRICE,QTY,CONDITION,UPC,WAREHOUSE,NOTES\n\
A1,iPhone 11 64GB Black,485.00,150,A/A-,190198578095,Miami,\n\
A2,iPhone 12 128GB Blue,600.00,10,New,194252031315,Miami,ships friday\n";

pub async fn vendor_price_template() -> Response {
    (
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        VENDOR_PRICE_TEMPLATE,
    )
        .into_response()
}

/// `POST /documents/upload` takes multipart `file`, `vendor_name?`, `processor?`.
/// Returns 202 with ids to poll; the artefact is written before any rows are
/// created so a storage failure leaves no dangling document.
pub async fn upload(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut vendor_name: Option<String> = None;
    let mut processor_name: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Ok(bad_request(format!("malformed multipart body: {err}"))),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| Error::invalid(format!("unreadable file field: {err}")))?;
                file = Some((filename, bytes.to_vec()));
            }
            "vendor_name" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| Error::invalid(format!("unreadable vendor_name: {err}")))?;
                if !value.trim().is_empty() {
                    vendor_name = Some(value.trim().to_string());
                }
            }
            "processor" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| Error::invalid(format!("unreadable processor: {err}")))?;
                if !value.trim().is_empty() {
                    processor_name = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let Some((filename, bytes)) = file else {
        return Ok(bad_request("missing file field"));
    };
    if bytes.is_empty() {
        return Ok(bad_request("uploaded file is empty"));
    }

    let processor = state
        .registry
        .select(processor_name.as_deref(), std::path::Path::new(&filename))?;

    let now = timefmt::now();
    let document_id = Uuid::new_v4();
    let key = storage_key(now, document_id, &filename);
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let size = bytes.len();

    state.artifacts.write(&key, &bytes).await?;

    let file_type = std::path::Path::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_ascii_lowercase();
    let processor_label = processor.name().to_string();
    let key_for_insert = key.clone();
    let inserted = state
        .store
        .with_conn(move |conn| {
            let vendor_id = match vendor_name.as_deref() {
                Some(name) => Some(vendors::get_or_create(conn, name, now)?.0.id),
                None => None,
            };
            let doc = SourceDocument {
                id: document_id,
                vendor_id,
                original_filename: filename,
                file_type,
                storage_uri: key_for_insert,
                ingest_started_at: None,
                ingest_completed_at: None,
                status: DocumentStatus::Pending,
                metadata: json!({ "sha256": sha256, "size_bytes": size }),
                created_at: now,
            };
            documents::insert(conn, &doc)?;
            let job = job_repo::new_job(document_id, Some(processor_label), now);
            job_repo::insert(conn, &job)?;
            Ok(job.id)
        })
        .await;

    let job_id = match inserted {
        Ok(job_id) => job_id,
        Err(err) => {
            state.artifacts.remove(&key).await;
            return Err(ApiError(err));
        }
    };

    if let Err(err) = state.jobs.enqueue(JobRequest {
        job_id,
        document_id,
        processor,
    }) {
        let cleanup = state
            .store
            .with_conn(move |conn| documents::delete(conn, document_id))
            .await;
        if let Err(cleanup_err) = cleanup {
            tracing::error!(error = %cleanup_err, "failed to roll back document after enqueue failure");
        }
        state.artifacts.remove(&key).await;
        return Err(ApiError(err));
    }

    state.metrics.incr(counter::DOCUMENTS_UPLOADED);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "document_id": document_id, "job_id": job_id })),
    )
        .into_response())
}

pub async fn list(
    State(state): State<SharedState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let limit = page.limit(50, 200);
    let offset = page.offset();
    let (docs, total) = state
        .store
        .with_conn(move |conn| documents::list(conn, limit, offset))
        .await?;
    Ok(Json(json!({
        "documents": docs,
        "total": total,
        "next_offset": page.next_offset(50, 200, total),
    })))
}

pub async fn detail(
    State(state): State<SharedState>,
    Path(document_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let (doc, doc_offers) = state
        .store
        .with_conn(move |conn| {
            let doc = documents::get(conn, document_id)?
                .ok_or_else(|| Error::not_found("document"))?;
            let doc_offers = offers::list(
                conn,
                &offers::OfferFilter {
                    document_id: Some(document_id),
                    limit: 500,
                    ..Default::default()
                },
            )?;
            Ok((doc, doc_offers))
        })
        .await?;
    Ok(Json(json!({ "document": doc, "offers": doc_offers })))
}

pub async fn job_status(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let (job, doc) = state
        .store
        .with_conn(move |conn| {
            let job = job_repo::get(conn, job_id)?.ok_or_else(|| Error::not_found("job"))?;
            let doc = documents::get(conn, job.source_document_id)?
                .ok_or_else(|| Error::not_found("document"))?;
            Ok((job, doc))
        })
        .await?;
    let offer_count = document_offer_count(&state.store, doc.id).await?;
    Ok(Json(json!({
        "job_id": job.id,
        "document_id": doc.id,
        "status": job.status,
        "created_at": timefmt::to_wire(&job.created_at),
        "updated_at": timefmt::to_wire(&job.updated_at),
        "summary": job_summary(&doc, offer_count),
        "logs": job.logs,
    })))
}
