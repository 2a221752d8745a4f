//! reqwest-backed capability implementations. Wire shapes are deliberately
//! plain JSON so a thin sidecar can front whichever model provider is in
//! use; prompt construction happens on the far side of these endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use pricebot_core::{Error, RawOffer, Result};

use crate::{EmbeddingService, RowExtractor, VisionTextExtractor};

const MAX_RETRIES: u8 = 1;

#[derive(Clone)]
struct HttpCapability {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpCapability {
    fn new(url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn post_once(&self, body: &Value) -> Result<Value> {
        let mut request = self.client.post(&self.url).json(body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| Error::DependencyUnavailable(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::DependencyUnavailable(format!(
                "HTTP {status} from {}: {detail}",
                self.url
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| Error::DependencyUnavailable(err.to_string()))
    }

    /// One transient retry, mirroring how worker calls are retried elsewhere
    /// in the stack; these services are best-effort by contract.
    async fn post(&self, body: &Value) -> Result<Value> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(body).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt <= MAX_RETRIES => {
                    warn!(attempt, url = %self.url, error = %err, "retrying enrichment request");
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub struct HttpRowExtractor {
    inner: HttpCapability,
}

impl HttpRowExtractor {
    pub fn new(url: &str, api_key: &str) -> Self {
        Self {
            inner: HttpCapability::new(url, api_key),
        }
    }
}

#[derive(Deserialize)]
struct RowsResponse {
    rows: Vec<Option<RawOffer>>,
}

#[async_trait]
impl RowExtractor for HttpRowExtractor {
    fn enabled(&self) -> bool {
        true
    }

    async fn extract_rows(&self, rows: &[Value]) -> Result<Vec<Option<RawOffer>>> {
        let response = self.inner.post(&json!({ "rows": rows })).await?;
        let parsed: RowsResponse = serde_json::from_value(response)
            .map_err(|err| Error::DependencyUnavailable(format!("bad extractor payload: {err}")))?;
        if parsed.rows.len() != rows.len() {
            return Err(Error::DependencyUnavailable(format!(
                "extractor returned {} rows for {} inputs",
                parsed.rows.len(),
                rows.len()
            )));
        }
        Ok(parsed.rows)
    }
}

pub struct HttpVisionExtractor {
    inner: HttpCapability,
}

impl HttpVisionExtractor {
    pub fn new(url: &str, api_key: &str) -> Self {
        Self {
            inner: HttpCapability::new(url, api_key),
        }
    }
}

#[derive(Deserialize)]
struct VisionResponse {
    text: String,
}

#[async_trait]
impl VisionTextExtractor for HttpVisionExtractor {
    fn enabled(&self) -> bool {
        true
    }

    async fn extract_text(&self, base64_payload: &str, media_type: &str) -> Result<String> {
        let response = self
            .inner
            .post(&json!({
                "content": base64_payload,
                "media_type": media_type,
            }))
            .await?;
        let parsed: VisionResponse = serde_json::from_value(response)
            .map_err(|err| Error::DependencyUnavailable(format!("bad vision payload: {err}")))?;
        Ok(parsed.text)
    }
}

pub struct HttpEmbeddingService {
    inner: HttpCapability,
}

impl HttpEmbeddingService {
    pub fn new(url: &str, api_key: &str) -> Self {
        Self {
            inner: HttpCapability::new(url, api_key),
        }
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedBatchResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    fn enabled(&self) -> bool {
        true
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self.inner.post(&json!({ "input": text })).await?;
        let parsed: EmbedResponse = serde_json::from_value(response)
            .map_err(|err| Error::DependencyUnavailable(format!("bad embedding payload: {err}")))?;
        Ok(parsed.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.inner.post(&json!({ "input": texts })).await?;
        let parsed: EmbedBatchResponse = serde_json::from_value(response)
            .map_err(|err| Error::DependencyUnavailable(format!("bad embedding payload: {err}")))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(Error::DependencyUnavailable(format!(
                "embedding service returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}
