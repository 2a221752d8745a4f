//! Pricebot HTTP service: upload intake, background processing, the live
//! WhatsApp collector endpoint, and the query APIs backing the chat tools.
//!
//! ```text
//! upload -> artefact store + SourceDocument(pending) -> job runner
//!        -> processor -> raw rows -> resolution -> offers -> history spans
//! whatsapp batch -> token/hmac/rate gates -> dedupe -> messages
//!        -> debounced extraction -> the same ingestion tail
//! ```

pub mod auth;
pub mod debounce;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod rate;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};

use pricebot_core::{Config, Result};
use pricebot_enrich::Capabilities;
use pricebot_ingest::{OfferIngestion, ResolverConfig};
use pricebot_processors::ProcessorRegistry;
use pricebot_store::{ArtifactStore, Store};
use pricebot_telemetry::Metrics;

use crate::debounce::ChatDebouncer;
use crate::extract::Extractor;
use crate::jobs::{JobContext, JobRunner, JobRunnerHandle};
use crate::rate::RateLimiter;
use crate::state::{AppState, SharedState};

/// A fully wired application: the router plus the runner handle the binary
/// needs for graceful shutdown. Tests use `router` directly.
pub struct App {
    pub router: Router,
    pub state: SharedState,
    pub runner: JobRunnerHandle,
}

pub async fn build_app(config: Config) -> Result<App> {
    let store = if config.database_path() == ":memory:" {
        Store::open_in_memory()?
    } else {
        Store::open(config.database_path())?
    };
    build_app_with_store(config, store).await
}

pub async fn build_app_with_store(config: Config, store: Store) -> Result<App> {
    let artifacts = ArtifactStore::new(config.ingestion_storage_dir.clone());
    let registry = ProcessorRegistry::new();
    let capabilities = Capabilities::from_config(&config);
    let metrics = Metrics::new();
    let ingestion = OfferIngestion::new(
        store.clone(),
        capabilities.embeddings.clone(),
        ResolverConfig {
            similarity_threshold: config.embedding_similarity_threshold,
            candidate_limit: config.embedding_candidate_limit,
        },
    );

    let job_ctx = Arc::new(JobContext {
        config: config.clone(),
        store: store.clone(),
        artifacts: artifacts.clone(),
        capabilities: capabilities.clone(),
        ingestion: ingestion.clone(),
        metrics: metrics.clone(),
    });
    let reconciled = jobs::reconcile_stale_jobs(&job_ctx).await?;
    if reconciled > 0 {
        tracing::warn!(reconciled, "marked stranded jobs as failed at startup");
    }
    let (runner, runner_handle) = JobRunner::start(Arc::clone(&job_ctx), config.worker_parallelism);

    let extractor = Extractor {
        store: store.clone(),
        ingestion: ingestion.clone(),
        metrics: metrics.clone(),
        default_currency: config.default_currency.clone(),
        window_hours: config.whatsapp_content_hash_window_hours,
    };
    let debouncer = ChatDebouncer::new(
        Duration::from_secs(config.whatsapp_extract_debounce_seconds),
        extractor,
    );

    let limiter = RateLimiter::new(
        config.whatsapp_ingest_rate_limit_per_minute,
        config.whatsapp_ingest_rate_limit_burst,
    );

    let state: SharedState = Arc::new(AppState {
        config,
        store,
        artifacts,
        registry,
        capabilities,
        ingestion,
        metrics,
        jobs: runner,
        debouncer,
        limiter,
    });

    Ok(App {
        router: build_router(state.clone()),
        state,
        runner: runner_handle,
    })
}

pub fn build_router(state: SharedState) -> Router {
    let admin = Router::new()
        .route("/admin/diagnostics", get(routes::admin::diagnostics))
        .route(
            "/admin/whatsapp/chats/{chat_id}/vendor",
            put(routes::admin::map_chat_vendor),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_basic_auth,
        ));

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/metrics", get(routes::metrics::metrics))
        .route("/documents/upload", post(routes::documents::upload))
        .route("/documents", get(routes::documents::list))
        .route(
            "/documents/templates/vendor-price",
            get(routes::documents::vendor_price_template),
        )
        .route("/documents/jobs/{job_id}", get(routes::documents::job_status))
        .route("/documents/{document_id}", get(routes::documents::detail))
        .route("/offers", get(routes::offers::list))
        .route("/products", get(routes::products::list))
        .route("/products/{product_id}", get(routes::products::detail))
        .route("/vendors", get(routes::vendors::list))
        .route("/vendors/{vendor_id}", get(routes::vendors::detail))
        .route(
            "/price-history/product/{product_id}",
            get(routes::history::for_product),
        )
        .route(
            "/price-history/vendor/{vendor_id}",
            get(routes::history::for_vendor),
        )
        .route(
            "/chat/tools/products/resolve",
            post(routes::chat_tools::resolve_products),
        )
        .route(
            "/chat/tools/offers/search-best-price",
            post(routes::chat_tools::search_best_price),
        )
        .route(
            "/integrations/whatsapp/ingest",
            post(routes::whatsapp::ingest),
        )
        .merge(admin)
        .layer(middleware::from_fn(auth::with_request_id))
        .layer(axum::extract::DefaultBodyLimit::max(50 * 1024 * 1024))
        .with_state(state)
}
