//! Embedding provider boundary.
//!
//! # Responsibility
//! - Define the async text→vector contract consumed by task services.
//! - Bound every provider call with a timeout and validate its output.
//!
//! # Invariants
//! - No provider call outlives its configured timeout.
//! - Returned vectors are finite and match the expected dimension when one is
//!   configured.

mod mock;

pub use mock::MockEmbeddingProvider;

use async_trait::async_trait;
use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Failure modes of an embedding provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    /// Call did not finish within the configured budget.
    Timeout { timeout_ms: u64 },
    /// Provider refused the call due to quota/rate limits.
    RateLimited,
    /// Provider rejected the input text.
    MalformedInput(String),
    /// Transport or provider-side failure.
    Unavailable(String),
    /// Provider returned a vector of the wrong length.
    DimensionMismatch { expected: usize, actual: usize },
    /// Provider returned NaN/Inf components.
    NonFiniteOutput,
}

impl Display for EmbeddingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { timeout_ms } => {
                write!(f, "embedding provider timed out after {timeout_ms}ms")
            }
            Self::RateLimited => write!(f, "embedding provider rate limited the request"),
            Self::MalformedInput(message) => write!(f, "embedding input rejected: {message}"),
            Self::Unavailable(message) => write!(f, "embedding provider unavailable: {message}"),
            Self::DimensionMismatch { expected, actual } => write!(
                f,
                "embedding dimension mismatch: expected {expected}, got {actual}"
            ),
            Self::NonFiniteOutput => write!(f, "embedding provider returned non-finite values"),
        }
    }
}

impl Error for EmbeddingError {}

/// Abstract text→vector embedding source.
///
/// Implementations must be `Send + Sync` so one instance can be shared behind
/// `Arc<dyn EmbeddingProvider>`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds one text input.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Fixed output dimension of this provider.
    fn dimensions(&self) -> usize;

    /// Model name for diagnostics.
    fn model_name(&self) -> &str;
}

/// Calls `provider` with a hard timeout and validates the returned vector.
///
/// `expected_dimensions` overrides the provider's own declaration when set.
pub async fn embed_with_timeout(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
    expected_dimensions: Option<usize>,
) -> Result<Vec<f32>, EmbeddingError> {
    let started_at = Instant::now();
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

    let result = match tokio::time::timeout(timeout, provider.embed_text(text)).await {
        Ok(result) => result,
        Err(_) => Err(EmbeddingError::Timeout { timeout_ms }),
    };
    let result = result.and_then(|vector| {
        let expected = expected_dimensions.unwrap_or_else(|| provider.dimensions());
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(EmbeddingError::NonFiniteOutput);
        }
        Ok(vector)
    });

    if let Err(err) = &result {
        warn!(
            "event=embedding_call module=embedding status=error model={} duration_ms={} error={}",
            provider.model_name(),
            started_at.elapsed().as_millis(),
            err
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        async fn embed_text(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![0.0; 4])
        }

        fn dimensions(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let err = embed_with_timeout(&SlowProvider, "text", Duration::from_millis(10), None)
            .await
            .unwrap_err();
        assert_eq!(err, EmbeddingError::Timeout { timeout_ms: 10 });
    }

    #[tokio::test]
    async fn dimension_override_is_enforced() {
        let provider = MockEmbeddingProvider::new(8);
        let err = embed_with_timeout(&provider, "text", Duration::from_secs(1), Some(16))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 16,
                actual: 8
            }
        );

        let ok = embed_with_timeout(&provider, "text", Duration::from_secs(1), None)
            .await
            .unwrap();
        assert_eq!(ok.len(), 8);
    }
}
