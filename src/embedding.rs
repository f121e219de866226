// src/embedding.rs

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::{ExternalError, with_timeout};
use crate::models::Chunk;

pub const EMBEDDING_SERVICE: &str = "embedding model";

/// A trained embedding model. Must be deterministic for a given version.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Identifier of the model weights (e.g. a path or registry id).
    fn model_id(&self) -> &str;

    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalError>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Scores every chunk against the query with `model`, bounded by `timeout`.
///
/// Similarities are clamped to [0, 1] so they share a scale with bandit rewards.
/// A response with the wrong number of vectors is an error, never a partial result.
pub async fn relevance_priors(
    model: &dyn EmbeddingModel,
    query: &str,
    chunks: &[Chunk],
    timeout: Duration,
) -> Result<Vec<f64>, ExternalError> {
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let mut texts = Vec::with_capacity(chunks.len() + 1);
    texts.push(query.to_string());
    texts.extend(chunks.iter().map(|c| c.text.clone()));

    let vectors = with_timeout(EMBEDDING_SERVICE, timeout, model.embed(&texts)).await?;
    if vectors.len() != texts.len() {
        return Err(ExternalError::malformed(
            EMBEDDING_SERVICE,
            format!("expected {} vectors, got {}", texts.len(), vectors.len()),
        ));
    }

    let query_vec = &vectors[0];
    Ok(vectors[1..]
        .iter()
        .map(|v| cosine_similarity(query_vec, v).clamp(0.0, 1.0))
        .collect())
}
