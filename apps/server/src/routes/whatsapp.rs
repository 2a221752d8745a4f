//! `POST /integrations/whatsapp/ingest`: authenticated, signed, rate-limited
//! batch intake from the collector, with strict per-message dedupe and
//! debounced extraction scheduling.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use pricebot_core::{
    ChatType, DocumentStatus, Error, SourceDocument, WhatsAppMessage, content_hash, storage_key,
    timefmt,
};
use pricebot_processors::{Processor, whatsapp_text};
use pricebot_store::{documents, jobs as job_repo, whatsapp};
use pricebot_telemetry::counter;

use crate::auth::{RequestId, check_ingest_signature, check_ingest_token};
use crate::error::{ApiError, bad_request};
use crate::jobs::JobRequest;
use crate::state::SharedState;

const MAX_BATCH: usize = 500;
const MAX_TEXT_CHARS: usize = 5000;
const MAX_CHAT_TITLE_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
pub struct MediaIn {
    pub filename: String,
    pub content_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppMessageIn {
    pub chat_title: String,
    #[serde(default)]
    pub chat_type: Option<String>,
    #[serde(default)]
    pub platform_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub observed_at: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_phone: Option<String>,
    #[serde(default)]
    pub is_outgoing: Option<bool>,
    pub text: String,
    #[serde(default)]
    pub media: Option<MediaIn>,
    #[serde(default)]
    pub raw_payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub client_id: String,
    pub messages: Vec<WhatsAppMessageIn>,
}

#[derive(Debug, Serialize)]
struct Decision {
    chat_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    content_hash: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    whatsapp_message_id: Option<Uuid>,
}

struct PreparedMedia {
    document_id: Uuid,
    storage_key: String,
    filename: String,
}

pub async fn ingest(
    State(state): State<SharedState>,
    rid: axum::Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(err) = check_ingest_token(&state.config, &headers) {
        return ApiError(err).into_response();
    }
    if let Err(err) =
        check_ingest_signature(&state.config, &headers, &body, Utc::now().timestamp())
    {
        return ApiError(err).into_response();
    }

    let request: IngestRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return bad_request(format!("malformed JSON body: {err}")),
    };
    if let Err(err) = validate(&request) {
        return ApiError(err).into_response();
    }

    if let Err(retry_after_secs) = state.limiter.check(&request.client_id) {
        state.metrics.incr(counter::WHATSAPP_RATE_LIMITED);
        return ApiError(Error::RateLimited { retry_after_secs }).into_response();
    }

    match process_batch(&state, request).await {
        Ok(outcome) => outcome_response(&state, &rid.0.0, outcome),
        Err(err) => ApiError(err).into_response(),
    }
}

fn validate(request: &IngestRequest) -> Result<(), Error> {
    if request.client_id.trim().is_empty() {
        return Err(Error::invalid("client_id: must not be empty"));
    }
    if request.messages.is_empty() {
        return Err(Error::invalid("messages: must not be empty"));
    }
    if request.messages.len() > MAX_BATCH {
        return Err(Error::invalid(format!(
            "messages: batch exceeds {MAX_BATCH} entries"
        )));
    }
    for (idx, message) in request.messages.iter().enumerate() {
        let title_len = message.chat_title.chars().count();
        if title_len == 0 || title_len > MAX_CHAT_TITLE_CHARS {
            return Err(Error::invalid(format!(
                "messages[{idx}].chat_title: length must be 1..={MAX_CHAT_TITLE_CHARS}"
            )));
        }
        let text_len = message.text.chars().count();
        if text_len == 0 || text_len > MAX_TEXT_CHARS {
            return Err(Error::invalid(format!(
                "messages[{idx}].text: length must be 1..={MAX_TEXT_CHARS}"
            )));
        }
    }
    Ok(())
}

struct BatchOutcome {
    accepted: usize,
    created: usize,
    deduped: usize,
    created_chats: usize,
    decisions: Vec<Decision>,
    chats_to_extract: HashSet<Uuid>,
    media_jobs: Vec<(Uuid, Uuid)>,
    unused_media_keys: Vec<String>,
}

async fn process_batch(
    state: &SharedState,
    request: IngestRequest,
) -> Result<BatchOutcome, Error> {
    state.metrics.incr(counter::WHATSAPP_BATCHES);

    // Media artefacts are written before the transaction opens; rows for
    // them are only created for messages that survive dedupe.
    let mut media: HashMap<usize, PreparedMedia> = HashMap::new();
    for (idx, message) in request.messages.iter().enumerate() {
        let Some(media_in) = &message.media else {
            continue;
        };
        let bytes = match B64.decode(media_in.content_base64.as_bytes()) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            _ => {
                tracing::warn!(index = idx, "dropping undecodable media attachment");
                continue;
            }
        };
        let document_id = Uuid::new_v4();
        let key = storage_key(timefmt::now(), document_id, &media_in.filename);
        state.artifacts.write(&key, &bytes).await?;
        media.insert(
            idx,
            PreparedMedia {
                document_id,
                storage_key: key,
                filename: media_in.filename.clone(),
            },
        );
    }

    let window_hours = state.config.whatsapp_content_hash_window_hours;
    let client_id = request.client_id.clone();
    state
        .store
        .with_conn(move |conn| {
            // One transaction per batch; concurrent batches serialize on the
            // connection, in-order processing inside.
            let tx = conn.transaction().map_err(Error::storage)?;
            let outcome = apply_batch(&tx, &request, &client_id, &media, window_hours)?;
            tx.commit().map_err(Error::storage)?;
            Ok(outcome)
        })
        .await
}

fn apply_batch(
    conn: &rusqlite::Connection,
    request: &IngestRequest,
    client_id: &str,
    media: &HashMap<usize, PreparedMedia>,
    window_hours: i64,
) -> Result<BatchOutcome, Error> {
    let now = timefmt::now();
    let window_start = now - chrono::Duration::hours(window_hours);
    let mut outcome = BatchOutcome {
        accepted: request.messages.len(),
        created: 0,
        deduped: 0,
        created_chats: 0,
        decisions: Vec::with_capacity(request.messages.len()),
        chats_to_extract: HashSet::new(),
        media_jobs: Vec::new(),
        unused_media_keys: Vec::new(),
    };

    for (idx, message) in request.messages.iter().enumerate() {
        let chat_type = message
            .chat_type
            .as_deref()
            .and_then(|raw| ChatType::from_str(raw).ok())
            .unwrap_or_default();
        let (chat, chat_created) = whatsapp::get_or_create_chat(
            conn,
            &message.chat_title,
            chat_type,
            message.platform_id.as_deref(),
            now,
        )?;
        if chat_created {
            outcome.created_chats += 1;
        }

        let hash = content_hash(
            &message.chat_title,
            message.sender_name.as_deref(),
            &message.text,
        );
        let mut decision = Decision {
            chat_title: message.chat_title.clone(),
            platform_id: message.platform_id.clone(),
            message_id: message.message_id.clone(),
            content_hash: hash.clone(),
            status: "created",
            reason: None,
            whatsapp_message_id: None,
        };

        let duplicate_by_id = match message.message_id.as_deref() {
            Some(message_id) => whatsapp::message_id_exists(conn, chat.id, message_id)?,
            None => false,
        };
        if duplicate_by_id {
            decision.status = "deduped";
            decision.reason = Some("duplicate_message_id");
            outcome.deduped += 1;
        } else if whatsapp::content_hash_seen_since(conn, chat.id, &hash, window_start)? {
            decision.status = "deduped";
            decision.reason = Some("duplicate_content_hash_within_window");
            outcome.deduped += 1;
        } else if message.text.trim().is_empty() {
            decision.status = "skipped";
            decision.reason = Some("empty_text");
        } else if whatsapp_text::is_filtered_event(&message.text) {
            decision.status = "skipped";
            decision.reason = Some("filtered_event");
        } else {
            let observed_at = message
                .observed_at
                .as_deref()
                .and_then(timefmt::parse_wire)
                .unwrap_or(now);
            let media_document_id = if let Some(prepared) = media.get(&idx) {
                insert_media_document(conn, &chat, prepared, now)?;
                outcome
                    .media_jobs
                    .push((prepared.document_id, media_job_id(conn, prepared)?));
                Some(prepared.document_id)
            } else {
                None
            };
            let row = WhatsAppMessage {
                id: Uuid::new_v4(),
                chat_id: chat.id,
                client_id: client_id.to_string(),
                observed_at,
                sender_name: message.sender_name.clone(),
                sender_phone: message.sender_phone.clone(),
                is_outgoing: message.is_outgoing.unwrap_or(false),
                text: message.text.clone(),
                message_id: message.message_id.clone(),
                content_hash: hash,
                raw_payload: message.raw_payload.clone(),
                media_document_id,
                created_at: now,
            };
            whatsapp::insert_message(conn, &row)?;
            decision.whatsapp_message_id = Some(row.id);
            outcome.created += 1;
            if !row.is_outgoing {
                outcome.chats_to_extract.insert(chat.id);
            }
        }

        if decision.status != "created" {
            if let Some(prepared) = media.get(&idx) {
                outcome.unused_media_keys.push(prepared.storage_key.clone());
            }
        }
        outcome.decisions.push(decision);
    }
    Ok(outcome)
}

fn insert_media_document(
    conn: &rusqlite::Connection,
    chat: &pricebot_core::WhatsAppChat,
    prepared: &PreparedMedia,
    now: chrono::NaiveDateTime,
) -> Result<(), Error> {
    let file_type = std::path::Path::new(&prepared.filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_ascii_lowercase();
    documents::insert(
        conn,
        &SourceDocument {
            id: prepared.document_id,
            vendor_id: chat.vendor_id,
            original_filename: prepared.filename.clone(),
            file_type,
            storage_uri: prepared.storage_key.clone(),
            ingest_started_at: None,
            ingest_completed_at: None,
            status: DocumentStatus::Pending,
            metadata: json!({ "source": "whatsapp_media", "chat_id": chat.id }),
            created_at: now,
        },
    )
}

fn media_job_id(conn: &rusqlite::Connection, prepared: &PreparedMedia) -> Result<Uuid, Error> {
    let job = job_repo::new_job(
        prepared.document_id,
        Some(Processor::DocumentText.name().to_string()),
        timefmt::now(),
    );
    job_repo::insert(conn, &job)?;
    Ok(job.id)
}

fn outcome_response(state: &SharedState, request_id: &str, outcome: BatchOutcome) -> Response {
    for key in &outcome.unused_media_keys {
        let artifacts = state.artifacts.clone();
        let key = key.clone();
        tokio::spawn(async move { artifacts.remove(&key).await });
    }
    for (document_id, job_id) in &outcome.media_jobs {
        if let Err(err) = state.jobs.enqueue(JobRequest {
            job_id: *job_id,
            document_id: *document_id,
            processor: Processor::DocumentText,
        }) {
            tracing::error!(error = %err, document_id = %document_id, "failed to enqueue media job");
        }
    }
    for chat_id in &outcome.chats_to_extract {
        state.debouncer.schedule(*chat_id);
    }

    state
        .metrics
        .incr_by(counter::WHATSAPP_CREATED, outcome.created as u64);
    state
        .metrics
        .incr_by(counter::WHATSAPP_DEDUPED, outcome.deduped as u64);
    let skipped = outcome
        .decisions
        .iter()
        .filter(|d| d.status == "skipped")
        .count();
    state
        .metrics
        .incr_by(counter::WHATSAPP_SKIPPED, skipped as u64);

    Json(json!({
        "request_id": request_id,
        "accepted": outcome.accepted,
        "created": outcome.created,
        "deduped": outcome.deduped,
        "created_chats": outcome.created_chats,
        "decisions": outcome.decisions,
    }))
    .into_response()
}
