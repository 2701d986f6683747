//! Deterministic hash-based embedding provider for tests and offline runs.

use super::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Produces stable embeddings from token hashes.
///
/// Each whitespace token contributes a hashed pseudo-random direction; the sum
/// is L2-normalized. Texts that share tokens therefore share direction, which
/// keeps similarity-based placement meaningful in tests.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn token_direction(&self, token: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let mut hash = hasher.finish();

        let mut direction = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            let value = (hash as f64 / u64::MAX as f64) * 2.0 - 1.0;
            direction.push(value as f32);

            let mut next = DefaultHasher::new();
            hash.hash(&mut next);
            hash = next.finish();
        }
        direction
    }

    fn hash_to_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimensions];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            for (slot, value) in embedding.iter_mut().zip(self.token_direction(&token)) {
                *slot += value;
            }
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.hash_to_embedding(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mock-hash-embedding"
    }
}
