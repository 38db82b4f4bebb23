//! Embedding service trait and the test implementation.
//!
//! - `EmbeddingService` is implemented by provider clients (see the
//!   `ragchat-llm` crate for the Azure OpenAI backend).
//! - `MockEmbedding` provides deterministic bag-of-words vectors so that
//!   retrieval in tests ranks chunks by shared vocabulary.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use ragchat_core::error::RagChatError;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. Used both
/// when building an index and when embedding a retrieval query.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, RagChatError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// Because `EmbeddingService::embed` returns `impl Future` it is not
/// object-safe. This trait uses a boxed future instead, allowing
/// `Arc<dyn DynEmbeddingService>` to be shared by every index.
///
/// A blanket implementation is provided so that every `EmbeddingService`
/// automatically implements `DynEmbeddingService`.
pub trait DynEmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text (boxed future).
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, RagChatError>> + Send + 'a>,
    >;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, RagChatError>> + Send + 'a>,
    > {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic bag-of-words vectors for testing
// ---------------------------------------------------------------------------

const MOCK_DIMENSIONS: usize = 384;

/// Mock embedding service that returns deterministic 384-dimensional vectors.
///
/// Every lowercase alphanumeric word is hashed into one bucket, so texts
/// sharing words have a positive cosine similarity and identical texts
/// produce identical vectors.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding;

impl MockEmbedding {
    pub fn new() -> Self {
        Self
    }

    fn words_to_vector(text: &str) -> Vec<f32> {
        let mut result = vec![0.0f32; MOCK_DIMENSIONS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % MOCK_DIMENSIONS as u64) as usize;
            result[bucket] += 1.0;
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagChatError> {
        if text.trim().is_empty() {
            return Err(RagChatError::Provider("Cannot embed empty text".to_string()));
        }
        Ok(Self::words_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        MOCK_DIMENSIONS
    }
}
