//! Model capabilities handed to the service at startup.

use std::sync::Arc;

use ragchat_core::config::RagChatConfig;
use ragchat_core::error::Result;
use ragchat_llm::{AzureOpenAiEmbedding, AzureOpenAiLlm, LlmService, MockLlm};
use ragchat_vector::{DynEmbeddingService, MockEmbedding};

/// The generation and embedding models every session shares.
#[derive(Clone)]
pub struct Capabilities {
    pub llm: Arc<dyn LlmService>,
    pub embedder: Arc<dyn DynEmbeddingService>,
}

impl Capabilities {
    pub fn new(llm: Arc<dyn LlmService>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self { llm, embedder }
    }

    /// Azure OpenAI clients for the configured deployments.
    pub fn from_config(config: &RagChatConfig) -> Result<Self> {
        let llm = AzureOpenAiLlm::new(&config.llm)?;
        let embedder = AzureOpenAiEmbedding::new(&config.embedding)?;
        Ok(Self::new(Arc::new(llm), Arc::new(embedder)))
    }

    /// Deterministic local models, for tests and offline runs.
    pub fn offline() -> Self {
        Self::new(Arc::new(MockLlm::echo()), Arc::new(MockEmbedding::new()))
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("llm", &self.llm.model_name())
            .field("embedding_dimensions", &self.embedder.dimensions())
            .finish()
    }
}
