/// Embedding collaborator contract
use crate::error::CoreResult;
use async_trait::async_trait;

/// Produces and compares embedding vectors.
///
/// The core never computes embeddings itself; it only stores and compares
/// the vectors this service hands out.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed raw audio into a vector
    async fn embed(&self, audio: &[u8]) -> CoreResult<Vec<f32>>;

    /// Similarity in [-1, 1]
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }
}

/// Cosine similarity; zero-norm or mismatched vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}
