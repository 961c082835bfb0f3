//! Embedding provider - OpenAI-compatible HTTP client for text embeddings.
//!
//! Supports any OpenAI-compatible embedding API:
//! - OpenAI (api.openai.com)
//! - Ollama (localhost:11434/v1)
//! - LiteLLM proxy
//! - vLLM, TGI, etc.
//!
//! Implements the `embed(text, kind) -> unit vector` contract of spec §4.3:
//! `kind` selects one of two fixed prefix strings prepended before the text
//! is sent to the model, and the returned vector is L2-normalized so that a
//! dot product against another normalized vector equals cosine similarity.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Which of the two fixed instruction prefixes to apply before embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    Document,
    Query,
}

impl EmbedKind {
    /// The prefix concatenated with the text before it reaches the model.
    /// Part of the cache key (spec §4.3), so these must stay stable.
    pub fn prefix(&self) -> &'static str {
        match self {
            EmbedKind::Document => "search_document: ",
            EmbedKind::Query => "search_query: ",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedKind::Document => "document",
            EmbedKind::Query => "query",
        }
    }
}

/// Status of an embedding provider check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderStatus {
    /// Provider is reachable and model works.
    Available { dimension: usize },
    /// Provider is reachable but the requested model was not found.
    ModelNotFound { message: String },
    /// Provider is unreachable.
    Unavailable { reason: String },
}

/// Embedding API provider using OpenAI-compatible HTTP endpoint.
pub struct EmbeddingProvider {
    api_base: String,
    api_key: Option<String>,
    model: String,
}

/// Request body for embedding API.
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

/// Response from embedding API.
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[allow(dead_code)]
    model: Option<String>,
    #[allow(dead_code)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[allow(dead_code)]
    index: usize,
}

#[derive(Deserialize)]
struct EmbeddingUsage {
    #[allow(dead_code)]
    prompt_tokens: Option<u64>,
    #[allow(dead_code)]
    total_tokens: Option<u64>,
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

impl EmbeddingProvider {
    /// Create a new embedding provider.
    pub fn new(api_base: &str, api_key: Option<&str>, model: &str) -> Self {
        let api_base = api_base.trim_end_matches('/').to_string();

        Self {
            api_base,
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
        }
    }

    /// Embed a single text, prefixed per `kind`, and return a unit vector.
    pub fn embed(&self, text: &str, kind: EmbedKind) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text], kind)?;
        results
            .into_iter()
            .next()
            .context("empty response from embedding API")
    }

    /// Embed multiple texts, all prefixed per `kind`, in one API call.
    /// Returns unit vectors in the same order as the input texts.
    pub fn embed_batch(&self, texts: &[&str], kind: EmbedKind) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prefixed: Vec<String> = texts
            .iter()
            .map(|t| format!("{}{}", kind.prefix(), t))
            .collect();
        let prefixed_refs: Vec<&str> = prefixed.iter().map(|s| s.as_str()).collect();

        let url = format!("{}/embeddings", self.api_base);
        let body = EmbeddingRequest {
            model: &self.model,
            input: prefixed_refs,
        };

        debug!(
            count = texts.len(),
            url = %url,
            model = %self.model,
            kind = kind.as_str(),
            "embedding texts"
        );

        let mut request = ureq::post(&url).header("Content-Type", "application/json");

        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", &format!("Bearer {}", key));
        }

        let mut response = request.send_json(&body).map_err(|e| match e {
            ureq::Error::StatusCode(status) => {
                anyhow::anyhow!("embedding API returned status {}", status)
            }
            ureq::Error::Io(io_err) => {
                anyhow::anyhow!("embedding API connection failed: {}", io_err)
            }
            other => anyhow::anyhow!("embedding API error: {}", other),
        })?;

        let resp: EmbeddingResponse = response
            .body_mut()
            .read_json()
            .context("failed to parse embedding API response")?;

        let mut data = resp.data;
        data.sort_by_key(|d| d.index);

        let vectors: Vec<Vec<f32>> = data
            .into_iter()
            .map(|d| normalize(d.embedding))
            .collect();

        if vectors.len() != texts.len() {
            warn!(
                got = vectors.len(),
                expected = texts.len(),
                "embedding API returned a different vector count than inputs"
            );
        }

        Ok(vectors)
    }

    /// Check if the embedding API is reachable.
    pub fn health_check(&self) -> Result<bool> {
        match self.embed("test", EmbedKind::Query) {
            Ok(v) => {
                debug!(dimension = v.len(), "embedding API healthy");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "embedding API health check failed");
                Ok(false)
            }
        }
    }

    /// Check provider status with detailed information.
    pub fn check_provider_status(&self) -> ProviderStatus {
        match self.embed("test", EmbedKind::Query) {
            Ok(v) => ProviderStatus::Available { dimension: v.len() },
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("404") || msg.contains("not found") || msg.contains("model") {
                    ProviderStatus::ModelNotFound { message: msg }
                } else {
                    ProviderStatus::Unavailable { reason: msg }
                }
            }
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value between -1.0 and 1.0, where 1.0 means identical direction.
/// For unit vectors this equals the dot product.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        return 0.0;
    }

    dot / denominator
}

/// Check if Ollama is running and reachable at the default endpoint.
pub fn check_ollama_available() -> Option<Vec<String>> {
    let url = "http://localhost:11434/api/tags";
    let mut resp = ureq::get(url).call().ok()?;

    #[derive(Deserialize)]
    struct OllamaModels {
        models: Option<Vec<OllamaModel>>,
    }
    #[derive(Deserialize)]
    struct OllamaModel {
        name: String,
    }

    let models: OllamaModels = resp.body_mut().read_json().ok()?;
    Some(
        models
            .models
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.name)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_empty() {
        let sim = cosine_similarity(&[], &[]);
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_cosine_similarity_mismatched_dims() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &b);
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_normalize_produces_unit_vector() {
        let v = normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_document_and_query_prefixes_differ() {
        assert_ne!(EmbedKind::Document.prefix(), EmbedKind::Query.prefix());
    }
}
