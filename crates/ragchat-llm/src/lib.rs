//! Generation and embedding provider bindings.
//!
//! `LlmService` is the seam chat engines stream completions through.
//! `AzureOpenAi` implements it (and `EmbeddingService`) against Azure
//! OpenAI deployments; `MockLlm` is the deterministic stand-in used by tests
//! and offline runs.

pub mod azure;
pub mod service;

pub use azure::{AzureOpenAiEmbedding, AzureOpenAiLlm};
pub use service::{collect_stream, LlmService, MockLlm, TokenStream};
