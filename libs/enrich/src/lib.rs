//! Optional enrichment capabilities behind trait seams: LLM-assisted row
//! extraction, vision text extraction for scanned documents, and dense text
//! embeddings for alias matching. Each capability ships a `Disabled` default
//! so the pipeline produces correct (if smaller) output with nothing
//! configured; HTTP implementations live in `http`.

mod http;
mod similarity;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use pricebot_core::{Error, RawOffer, Result};

pub use http::{HttpEmbeddingService, HttpRowExtractor, HttpVisionExtractor};
pub use similarity::cosine_similarity;

/// Fallback extractor for rows the heuristic parsers could not handle.
/// Receives the raw row payloads and returns at most one `RawOffer` each,
/// `None` for rows the extractor could not recover either.
#[async_trait]
pub trait RowExtractor: Send + Sync {
    fn enabled(&self) -> bool;
    async fn extract_rows(&self, rows: &[Value]) -> Result<Vec<Option<RawOffer>>>;
}

/// Turns an image or scanned PDF (base64-encoded) into plain text.
#[async_trait]
pub trait VisionTextExtractor: Send + Sync {
    fn enabled(&self) -> bool;
    async fn extract_text(&self, base64_payload: &str, media_type: &str) -> Result<String>;
}

/// Dense embedding of a short product description.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    fn enabled(&self) -> bool;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch helper; the default loops, HTTP impls may override.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// The no-op stand-in for every capability.
#[derive(Clone, Copy, Default)]
pub struct Disabled;

#[async_trait]
impl RowExtractor for Disabled {
    fn enabled(&self) -> bool {
        false
    }

    async fn extract_rows(&self, _rows: &[Value]) -> Result<Vec<Option<RawOffer>>> {
        Err(Error::DependencyUnavailable("llm extraction disabled".into()))
    }
}

#[async_trait]
impl VisionTextExtractor for Disabled {
    fn enabled(&self) -> bool {
        false
    }

    async fn extract_text(&self, _base64_payload: &str, _media_type: &str) -> Result<String> {
        Err(Error::DependencyUnavailable("vision extraction disabled".into()))
    }
}

#[async_trait]
impl EmbeddingService for Disabled {
    fn enabled(&self) -> bool {
        false
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::DependencyUnavailable("embedding service disabled".into()))
    }
}

/// Bundle handed to processors and the ingestion service.
#[derive(Clone)]
pub struct Capabilities {
    pub llm: Arc<dyn RowExtractor>,
    pub vision: Arc<dyn VisionTextExtractor>,
    pub embeddings: Arc<dyn EmbeddingService>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            llm: Arc::new(Disabled),
            vision: Arc::new(Disabled),
            embeddings: Arc::new(Disabled),
        }
    }
}

impl Capabilities {
    /// Wires HTTP implementations for whatever the config enables; anything
    /// unset stays disabled.
    pub fn from_config(cfg: &pricebot_core::Config) -> Self {
        let mut caps = Self::default();
        if cfg.enable_llm_extraction {
            if let (Some(url), Some(key)) = (cfg.llm_api_url.as_deref(), cfg.llm_api_key.as_deref())
            {
                caps.llm = Arc::new(HttpRowExtractor::new(url, key));
            }
        }
        if let Some(url) = cfg.vision_api_url.as_deref() {
            caps.vision = Arc::new(HttpVisionExtractor::new(
                url,
                cfg.llm_api_key.as_deref().unwrap_or_default(),
            ));
        }
        if let Some(url) = cfg.embedding_api_url.as_deref() {
            caps.embeddings = Arc::new(HttpEmbeddingService::new(
                url,
                cfg.llm_api_key.as_deref().unwrap_or_default(),
            ));
        }
        caps
    }
}
