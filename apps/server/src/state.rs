//! Shared application state: config, stores, capabilities, and the
//! background machinery handles. Everything is explicit; there are no
//! process-wide singletons.

use std::sync::Arc;

use pricebot_core::Config;
use pricebot_enrich::Capabilities;
use pricebot_ingest::OfferIngestion;
use pricebot_processors::ProcessorRegistry;
use pricebot_store::{ArtifactStore, Store};
use pricebot_telemetry::Metrics;

use crate::debounce::ChatDebouncer;
use crate::jobs::JobRunner;
use crate::rate::RateLimiter;

pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub artifacts: ArtifactStore,
    pub registry: ProcessorRegistry,
    pub capabilities: Capabilities,
    pub ingestion: OfferIngestion,
    pub metrics: Metrics,
    pub jobs: JobRunner,
    pub debouncer: ChatDebouncer,
    pub limiter: RateLimiter,
}

pub type SharedState = Arc<AppState>;
