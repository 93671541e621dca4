//! Embedding provider abstraction.
//!
//! One client embeds both chunk text at ingestion and query text at search
//! time — results are only comparable when they come from the same model, so
//! the whole process shares a single configured client.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::config::EmbeddingConfig;
use crate::error::AppError;

/// All available embedding backends.
#[derive(Debug, Clone)]
pub enum EmbeddingClient {
    Http(HttpEmbedder),
    Fixed(FixedEmbedder),
}

impl EmbeddingClient {
    pub fn build(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self, AppError> {
        match config.provider.as_str() {
            "http" => Ok(EmbeddingClient::Http(HttpEmbedder::new(
                config.api_base_url.clone(),
                config.model.clone(),
                config.timeout_seconds,
                api_key,
            )?)),
            "fixed" => Ok(EmbeddingClient::Fixed(FixedEmbedder::default())),
            other => Err(AppError::Config(format!("unknown embedding provider: {other}"))),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Provider("embedding response was empty".into()))
    }

    /// Embed a batch of texts, one vector per input, input order preserved.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        match self {
            EmbeddingClient::Http(e) => e.embed_batch(texts).await,
            EmbeddingClient::Fixed(e) => Ok(texts.iter().map(|t| e.embed(t)).collect()),
        }
    }
}

// ── HTTP backend ─────────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/embeddings`.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: Client,
    api_base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(
        api_base_url: String,
        model: String,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AppError::Provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_base_url, model, api_key })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let payload = EmbeddingRequest { model: self.model.clone(), input: texts.to_vec() };
        debug!(model = %payload.model, inputs = texts.len(), "sending embedding request");

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "embedding HTTP request failed");
            AppError::Provider(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!("embedding API HTTP {status}: {body}")));
        }

        let parsed = response.json::<EmbeddingResponse>().await.map_err(|e| {
            AppError::Provider(format!("failed to parse embedding response: {e}"))
        })?;

        if parsed.data.len() != texts.len() {
            return Err(AppError::Provider(format!(
                "embedding count mismatch: sent {}, received {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The API tags each vector with its input index; honor it rather than
        // assuming response order.
        let mut vectors = vec![Vec::new(); texts.len()];
        for item in parsed.data {
            let slot = vectors.get_mut(item.index).ok_or_else(|| {
                AppError::Provider(format!("embedding index {} out of range", item.index))
            })?;
            *slot = item.embedding;
        }
        Ok(vectors)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

// ── Deterministic backend ────────────────────────────────────────────────────

/// Deterministic hash-derived vectors for tests and offline runs.
///
/// Not semantically meaningful, but stable: equal text always embeds to the
/// equal vector, which is all the store-adapter and loop tests need.
#[derive(Debug, Clone)]
pub struct FixedEmbedder {
    dimension: usize,
}

impl Default for FixedEmbedder {
    fn default() -> Self {
        Self { dimension: 16 }
    }
}

impl FixedEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut v: Vec<f32> = digest
            .iter()
            .cycle()
            .take(self.dimension)
            .map(|b| (*b as f32 / 127.5) - 1.0)
            .collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

/// Cosine similarity between two vectors. Zero for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
