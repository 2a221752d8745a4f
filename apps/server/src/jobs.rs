//! Background upload processing: a FIFO queue drained by a bounded worker
//! pool. Workers mark the job running, run the selected processor, hand the
//! rows to offer ingestion, and leave both the job and the document in a
//! terminal state. Failures never retry automatically.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use pricebot_core::{
    Config, DocumentStatus, Error, JobLogEntry, JobStatus, Result, SourceDocument, timefmt,
};
use pricebot_enrich::Capabilities;
use pricebot_ingest::{IngestTarget, OfferIngestion};
use pricebot_processors::{ProcessContext, Processor};
use pricebot_store::{ArtifactStore, Store, documents, jobs, offers};
use pricebot_telemetry::{Metrics, counter};

/// Everything a worker needs; built once at startup.
pub struct JobContext {
    pub config: Config,
    pub store: Store,
    pub artifacts: ArtifactStore,
    pub capabilities: Capabilities,
    pub ingestion: OfferIngestion,
    pub metrics: Metrics,
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: Uuid,
    pub document_id: Uuid,
    pub processor: Processor,
}

#[derive(Clone)]
pub struct JobRunner {
    tx: mpsc::UnboundedSender<JobRequest>,
    depth: Arc<AtomicI64>,
}

pub struct JobRunnerHandle {
    workers: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl JobRunner {
    pub fn start(ctx: Arc<JobContext>, parallelism: usize) -> (Self, JobRunnerHandle) {
        let (tx, rx) = mpsc::unbounded_channel::<JobRequest>();
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let depth = Arc::new(AtomicI64::new(0));

        let workers = (0..parallelism.max(1))
            .map(|worker_idx| {
                let ctx = Arc::clone(&ctx);
                let rx = Arc::clone(&rx);
                let shutdown_rx = shutdown_rx.clone();
                let depth = Arc::clone(&depth);
                tokio::spawn(worker_loop(worker_idx, ctx, rx, shutdown_rx, depth))
            })
            .collect();

        (
            Self { tx, depth },
            JobRunnerHandle {
                workers,
                shutdown_tx,
            },
        )
    }

    /// Non-blocking enqueue; fails only once the runner has shut down.
    pub fn enqueue(&self, request: JobRequest) -> Result<()> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.tx.send(request).map_err(|err| {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            Error::storage(anyhow::anyhow!("job queue closed: {err}"))
        })
    }

    pub fn queue_depth(&self) -> i64 {
        self.depth.load(Ordering::Relaxed).max(0)
    }
}

impl JobRunnerHandle {
    /// Finishes in-flight jobs up to the grace deadline, then aborts. Jobs
    /// left `running` by an abort are reconciled at next startup.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let deadline = tokio::time::Instant::now() + grace;
        for mut worker in self.workers {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut worker).await.is_err() {
                worker.abort();
            }
        }
    }
}

async fn worker_loop(
    worker_idx: usize,
    ctx: Arc<JobContext>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<JobRequest>>>,
    mut shutdown_rx: watch::Receiver<bool>,
    depth: Arc<AtomicI64>,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown_rx.changed() => break,
            request = async { rx.lock().await.recv().await } => request,
        };
        let Some(request) = request else { break };
        depth.fetch_sub(1, Ordering::Relaxed);
        tracing::info!(
            worker = worker_idx,
            job_id = %request.job_id,
            document_id = %request.document_id,
            processor = request.processor.name(),
            "processing upload"
        );
        run_job(&ctx, request).await;
    }
}

async fn run_job(ctx: &JobContext, request: JobRequest) {
    let started = timefmt::now();
    let job_id = request.job_id;
    let document_id = request.document_id;

    let doc = ctx
        .store
        .with_conn(move |conn| {
            jobs::update(
                conn,
                job_id,
                JobStatus::Running,
                &[JobLogEntry::info("job picked up")],
                started,
            )?;
            documents::mark_processing(conn, document_id, started)?;
            documents::get(conn, document_id)?.ok_or_else(|| Error::not_found("document"))
        })
        .await;
    let doc = match doc {
        Ok(doc) => doc,
        Err(err) => {
            tracing::error!(job_id = %job_id, error = %err, "could not start job");
            fail_job(ctx, job_id, document_id, &err.to_string()).await;
            return;
        }
    };

    let path = ctx.artifacts.path_for(&doc.storage_uri);
    let process_ctx = ProcessContext {
        default_currency: ctx.config.default_currency.clone(),
        prefer_llm: ctx.config.enable_llm_extraction,
        pdf_min_text_chars: ctx.config.pdf_min_text_chars,
        capabilities: ctx.capabilities.clone(),
    };

    let result = match request.processor.process(&path, &process_ctx).await {
        Ok(result) => result,
        Err(err) => {
            ctx.metrics
                .record_failure("processor", Some(doc.id), err.to_string());
            fail_job(ctx, job_id, document_id, &err.to_string()).await;
            return;
        }
    };

    let target = IngestTarget {
        document_id: Some(doc.id),
        declared_vendor: None,
        declared_vendor_id: doc.vendor_id,
        document_vendor_hint: result.meta.declared_vendor.clone(),
        currency_hint: result.meta.currency_hint.clone(),
        default_currency: ctx.config.default_currency.clone(),
        default_captured_at: doc.ingest_started_at.or(Some(started)),
    };

    let meta = result.meta.clone();
    let mut warnings = result.warnings.clone();
    let summary = match ctx.ingestion.ingest(result.rows, target).await {
        Ok(summary) => summary,
        Err(err) => {
            ctx.metrics
                .record_failure("ingestion", Some(doc.id), err.to_string());
            fail_job(ctx, job_id, document_id, &err.to_string()).await;
            return;
        }
    };
    warnings.extend(summary.warnings.clone());

    let status = if warnings.is_empty() {
        DocumentStatus::Processed
    } else {
        DocumentStatus::ProcessedWithWarnings
    };
    let warning_count = warnings.len();
    let metadata = serde_json::json!({
        "processor": request.processor.name(),
        "total_rows": meta.total_rows,
        "parsed_rows": meta.parsed_rows,
        "offers_created": summary.offers_created,
        "products_created": summary.products_created,
        "vendors_created": summary.vendors_created,
        "rows_skipped": summary.rows_skipped,
        "warnings": warnings,
    });

    let finish = ctx
        .store
        .with_conn(move |conn| {
            let now = timefmt::now();
            documents::mark_terminal(conn, document_id, status, &metadata, now)?;
            jobs::update(
                conn,
                job_id,
                JobStatus::Succeeded,
                &[JobLogEntry::info(format!(
                    "done: {} offers, {warning_count} warnings",
                    metadata["offers_created"]
                ))],
                now,
            )
        })
        .await;

    match finish {
        Ok(()) => {
            ctx.metrics.incr(counter::JOBS_SUCCEEDED);
            ctx.metrics
                .incr_by(counter::OFFERS_INGESTED, summary.offers_created as u64);
            ctx.metrics
                .incr_by(counter::PRODUCTS_CREATED, summary.products_created as u64);
            ctx.metrics
                .incr_by(counter::VENDORS_CREATED, summary.vendors_created as u64);
            ctx.metrics
                .incr_by(counter::ROWS_SKIPPED, summary.rows_skipped as u64);
        }
        Err(err) => {
            ctx.metrics
                .record_failure("job", Some(document_id), err.to_string());
            fail_job(ctx, job_id, document_id, &err.to_string()).await;
        }
    }
}

async fn fail_job(ctx: &JobContext, job_id: Uuid, document_id: Uuid, detail: &str) {
    ctx.metrics.incr(counter::JOBS_FAILED);
    let detail = detail.to_string();
    let outcome = ctx
        .store
        .with_conn(move |conn| {
            let now = timefmt::now();
            let metadata = serde_json::json!({ "error": detail.clone() });
            if let Some(doc) = documents::get(conn, document_id)? {
                if !doc.status.is_terminal() {
                    documents::mark_terminal(conn, document_id, DocumentStatus::Failed, &metadata, now)?;
                }
            }
            jobs::update(
                conn,
                job_id,
                JobStatus::Failed,
                &[JobLogEntry::error(detail)],
                now,
            )
        })
        .await;
    if let Err(err) = outcome {
        tracing::error!(job_id = %job_id, error = %err, "failed to record job failure");
    }
}

/// Startup pass over jobs stranded in `running` by a hard shutdown.
pub async fn reconcile_stale_jobs(ctx: &JobContext) -> Result<usize> {
    let cutoff = timefmt::now() - chrono::Duration::minutes(ctx.config.job_reconcile_after_minutes);
    let stale = ctx.store.with_conn(move |conn| jobs::stale_running(conn, cutoff)).await?;
    let count = stale.len();
    for job in stale {
        tracing::warn!(job_id = %job.id, "reconciling job stranded in running state");
        fail_job(
            ctx,
            job.id,
            job.source_document_id,
            "reconciled: runner shut down mid-job",
        )
        .await;
        ctx.metrics.incr(counter::JOBS_RECONCILED);
    }
    Ok(count)
}

/// Shared summary shape for the job-status endpoint.
pub fn job_summary(
    doc: &SourceDocument,
    offers: u64,
) -> serde_json::Value {
    let warnings = doc
        .metadata
        .get("warnings")
        .and_then(|w| w.as_array())
        .map(|w| w.len())
        .unwrap_or(0);
    let errors = doc
        .metadata
        .get("error")
        .map(|_| 1usize)
        .unwrap_or(0);
    serde_json::json!({
        "offers": offers,
        "warnings": warnings,
        "errors": errors,
    })
}

/// Offer count used by both the job-status and document-detail endpoints.
pub async fn document_offer_count(store: &Store, document_id: Uuid) -> Result<u64> {
    store
        .with_conn(move |conn| offers::count_for_document(conn, document_id))
        .await
}
