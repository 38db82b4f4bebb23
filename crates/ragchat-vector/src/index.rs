//! Document index: chunking, embedding, and brute-force cosine retrieval.
//!
//! `VectorIndex` stores embedded chunks and answers top-k queries in O(n),
//! which is adequate for per-session upload batches. `DocumentIndex` is the
//! handle sessions own; `IndexConstructor` is the seam the index builder
//! calls to produce one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use ragchat_core::error::RagChatError;
use ragchat_core::types::{Document, RetrievedChunk};

use crate::embedding::DynEmbeddingService;

/// A single hit returned from a vector search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The ID of the matching chunk.
    pub id: Uuid,
    /// Cosine similarity score.
    pub score: f64,
    pub file_name: String,
    pub text: String,
}

#[derive(Debug, Clone)]
struct VectorEntry {
    embedding: Vec<f32>,
    file_name: String,
    text: String,
}

/// In-memory vector index using brute-force cosine similarity.
///
/// Thread-safe via interior RwLock.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Arc<RwLock<HashMap<Uuid, VectorEntry>>>,
}

impl VectorIndex {
    /// Create a new empty vector index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an embedded chunk. Overwrites any existing entry with the same ID.
    pub fn insert(
        &self,
        id: Uuid,
        embedding: Vec<f32>,
        file_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), RagChatError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| RagChatError::IndexBuild(format!("Lock poisoned: {}", e)))?;
        entries.insert(
            id,
            VectorEntry {
                embedding,
                file_name: file_name.into(),
                text: text.into(),
            },
        );
        Ok(())
    }

    /// Search for the k nearest chunks to the query vector by cosine similarity.
    ///
    /// Returns results sorted by descending similarity score.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, RagChatError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| RagChatError::Provider(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<SearchHit> = entries
            .iter()
            .map(|(id, entry)| SearchHit {
                id: *id,
                score: cosine_similarity(query, &entry.embedding),
                file_name: entry.file_name.clone(),
                text: entry.text.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Return the number of chunks currently stored in the index.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Return true if the index contains no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Split text into windows of at most `chunk_size` characters, each sharing
/// `overlap` characters with its predecessor.
///
/// Windows end on whitespace when one exists in the second half of the
/// window, so words are rarely cut.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());
        if end < chars.len() {
            let floor = start + chunk_size / 2;
            if let Some(ws) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

// =============================================================================
// DocumentIndex
// =============================================================================

/// Queryable index over one batch of documents.
///
/// Immutable once built; sessions hold it behind an `Arc` and replace the
/// whole handle when a new batch is uploaded.
pub struct DocumentIndex {
    id: Uuid,
    vectors: VectorIndex,
    embedder: Arc<dyn DynEmbeddingService>,
    document_count: usize,
    built_at: DateTime<Utc>,
}

impl std::fmt::Debug for DocumentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIndex")
            .field("id", &self.id)
            .field("document_count", &self.document_count)
            .field("chunk_count", &self.vectors.len())
            .field("built_at", &self.built_at)
            .finish()
    }
}

impl DocumentIndex {
    /// Chunk and embed every document.
    pub async fn from_documents(
        documents: &[Document],
        embedder: Arc<dyn DynEmbeddingService>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self, RagChatError> {
        let vectors = VectorIndex::new();

        for doc in documents {
            for chunk in split_text(&doc.text, chunk_size, chunk_overlap) {
                let embedding = embedder.embed_boxed(&chunk).await.map_err(|e| {
                    RagChatError::IndexBuild(format!("embedding {}: {}", doc.file_name, e))
                })?;
                vectors.insert(Uuid::new_v4(), embedding, doc.file_name.clone(), chunk)?;
            }
        }

        let index = Self {
            id: Uuid::new_v4(),
            vectors,
            embedder,
            document_count: documents.len(),
            built_at: Utc::now(),
        };
        info!(
            index_id = %index.id,
            documents = index.document_count,
            chunks = index.vectors.len(),
            "Document index built"
        );
        Ok(index)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    pub fn chunk_count(&self) -> usize {
        self.vectors.len()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Embed the query and return the `top_k` most similar chunks.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RagChatError> {
        if query.trim().is_empty() || self.vectors.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed_boxed(query).await?;
        let hits = self.vectors.search(&embedding, top_k)?;
        debug!(index_id = %self.id, hits = hits.len(), "Retrieved chunks");
        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                file_name: hit.file_name,
                text: hit.text,
                score: hit.score,
            })
            .collect())
    }
}

// =============================================================================
// IndexConstructor
// =============================================================================

/// Builds a queryable index from loaded documents.
#[async_trait]
pub trait IndexConstructor: Send + Sync {
    async fn build(&self, documents: Vec<Document>) -> Result<Arc<DocumentIndex>, RagChatError>;
}

/// Default constructor: chunk, embed with the configured model, store in a
/// [`VectorIndex`].
pub struct EmbeddingIndexConstructor {
    embedder: Arc<dyn DynEmbeddingService>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl EmbeddingIndexConstructor {
    pub fn new(
        embedder: Arc<dyn DynEmbeddingService>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            embedder,
            chunk_size,
            chunk_overlap,
        }
    }
}

#[async_trait]
impl IndexConstructor for EmbeddingIndexConstructor {
    async fn build(&self, documents: Vec<Document>) -> Result<Arc<DocumentIndex>, RagChatError> {
        let index = DocumentIndex::from_documents(
            &documents,
            Arc::clone(&self.embedder),
            self.chunk_size,
            self.chunk_overlap,
        )
        .await?;
        Ok(Arc::new(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;

    fn doc(name: &str, text: &str) -> Document {
        Document {
            file_name: name.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_insert_and_search() {
        let index = VectorIndex::new();
        index
            .insert(Uuid::new_v4(), vec![1.0f32; 8], "a.txt", "one")
            .unwrap();
        index
            .insert(Uuid::new_v4(), vec![1.0f32; 8], "b.txt", "two")
            .unwrap();
        assert_eq!(index.len(), 2);

        let hits = index.search(&[1.0f32; 8], 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_ordering_and_k_limit() {
        let index = VectorIndex::new();
        let close = Uuid::new_v4();
        index.insert(close, vec![1.0f32; 8], "a.txt", "close").unwrap();
        for _ in 0..5 {
            index
                .insert(Uuid::new_v4(), vec![-1.0f32; 8], "b.txt", "far")
                .unwrap();
        }

        let hits = index.search(&[1.0f32; 8], 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, close);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_search_empty_index() {
        let index = VectorIndex::new();
        assert!(index.is_empty());
        assert!(index.search(&[1.0f32; 8], 10).unwrap().is_empty());
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[0.0; 4], &[1.0; 4]), 0.0);
        assert_eq!(cosine_similarity(&[1.0; 4], &[1.0; 5]), 0.0);
        let mut a = vec![0.0f32; 4];
        let mut b = vec![0.0f32; 4];
        a[0] = 1.0;
        b[1] = 1.0;
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_split_text_short_text_is_one_chunk() {
        assert_eq!(split_text("Paris is nice", 1024, 200), vec!["Paris is nice"]);
        assert!(split_text("   ", 1024, 200).is_empty());
    }

    #[test]
    fn test_split_text_overlaps_and_covers_everything() {
        let text = (0..200).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = split_text(&text, 100, 20);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
        assert!(chunks[0].starts_with("w0"));
        assert!(chunks.last().unwrap().ends_with("w199"));
    }

    #[test]
    fn test_split_text_without_whitespace_terminates() {
        let text = "x".repeat(250);
        let chunks = split_text(&text, 100, 99);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.len() <= 100));
    }

    #[test]
    fn test_split_text_handles_multibyte() {
        let text = "é".repeat(30);
        let chunks = split_text(&text, 10, 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[tokio::test]
    async fn test_document_index_retrieves_relevant_chunk() {
        let docs = vec![
            doc("a.txt", "Paris is the capital of France"),
            doc("b.txt", "Bananas grow in tropical bunches"),
        ];
        let index = DocumentIndex::from_documents(&docs, Arc::new(MockEmbedding::new()), 1024, 200)
            .await
            .unwrap();
        assert_eq!(index.document_count(), 2);
        assert_eq!(index.chunk_count(), 2);

        let hits = index.retrieve("What is the capital of France?", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_name, "a.txt");
        assert!(hits[0].text.contains("Paris"));
    }

    #[tokio::test]
    async fn test_retrieve_on_empty_query_returns_nothing() {
        let docs = vec![doc("a.txt", "content")];
        let index = DocumentIndex::from_documents(&docs, Arc::new(MockEmbedding::new()), 1024, 200)
            .await
            .unwrap();
        assert!(index.retrieve("  ", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_constructor_assigns_unique_ids() {
        let constructor =
            EmbeddingIndexConstructor::new(Arc::new(MockEmbedding::new()), 1024, 200);
        let a = constructor.build(vec![doc("a.txt", "text")]).await.unwrap();
        let b = constructor.build(vec![doc("a.txt", "text")]).await.unwrap();
        assert_ne!(a.id(), b.id());
    }
}
