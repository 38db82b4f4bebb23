//! RAG Chat vector crate - embedding service, document loader, and index.
//!
//! Provides the embedding service trait with a deterministic mock, a
//! directory loader that turns staged uploads into documents, and the
//! in-memory document index the chat engines retrieve from.

pub mod embedding;
pub mod index;
pub mod loader;

pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding};
pub use index::{DocumentIndex, EmbeddingIndexConstructor, IndexConstructor, VectorIndex};
pub use loader::{DirectoryLoader, DocumentLoader};
