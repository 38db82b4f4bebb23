//! Azure OpenAI bindings for generation and embedding.
//!
//! Both clients address a deployment as
//! `{endpoint}/openai/deployments/{deployment}/{operation}?api-version={v}`
//! and authenticate with the `api-key` header. Chat completions are
//! streamed as server-sent events.

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{info, trace, warn};

use ragchat_core::config::ModelEndpointConfig;
use ragchat_core::error::RagChatError;
use ragchat_core::types::ChatMessage;
use ragchat_vector::EmbeddingService;

use crate::service::{LlmService, TokenStream};

/// Connection details shared by both clients.
#[derive(Clone)]
struct Deployment {
    client: Client,
    headers: HeaderMap,
    base_url: String,
    api_version: String,
    model: String,
}

impl Deployment {
    fn from_config(config: &ModelEndpointConfig) -> Result<Self, RagChatError> {
        if config.endpoint.is_empty() || config.api_key.is_empty() || config.api_version.is_empty()
        {
            return Err(RagChatError::Config(format!(
                "deployment '{}' needs endpoint, api_key and api_version",
                config.deployment
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "api-key",
            HeaderValue::from_str(&config.api_key)
                .map_err(|e| RagChatError::Config(format!("invalid api key: {}", e)))?,
        );

        // Per-read deadline so a long but live stream is not cut off.
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| RagChatError::Provider(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            headers,
            base_url: format!(
                "{}/openai/deployments/{}",
                config.endpoint.trim_end_matches('/'),
                config.deployment
            ),
            api_version: config.api_version.clone(),
            model: config.model.clone(),
        })
    }

    fn url(&self, operation: &str) -> String {
        format!(
            "{}/{}?api-version={}",
            self.base_url, operation, self.api_version
        )
    }

    async fn post(
        &self,
        operation: &str,
        body: &impl Serialize,
    ) -> Result<reqwest::Response, RagChatError> {
        let response = self
            .client
            .post(self.url(operation))
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| RagChatError::Provider(format!("{} request: {}", operation, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagChatError::Provider(format!(
                "{} returned {}: {}",
                operation, status, text
            )));
        }
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Chat completions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Streaming chat client for one Azure OpenAI deployment.
#[derive(Clone)]
pub struct AzureOpenAiLlm {
    deployment: Deployment,
    temperature: f32,
}

impl AzureOpenAiLlm {
    pub fn new(config: &ModelEndpointConfig) -> Result<Self, RagChatError> {
        let deployment = Deployment::from_config(config)?;
        info!(
            model = %config.model,
            deployment = %config.deployment,
            "Azure OpenAI chat model configured"
        );
        Ok(Self {
            deployment,
            temperature: config.temperature,
        })
    }
}

/// Pull the content deltas out of one SSE `data:` payload.
///
/// Returns `None` for the `[DONE]` sentinel.
fn parse_sse_data(data: &str) -> Option<Vec<String>> {
    if data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => Some(
            chunk
                .choices
                .into_iter()
                .filter_map(|c| c.delta.content)
                .filter(|c| !c.is_empty())
                .collect(),
        ),
        Err(e) => {
            warn!("failed to parse chunk: {e}, data: {data}");
            Some(Vec::new())
        }
    }
}

#[async_trait]
impl LlmService for AzureOpenAiLlm {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, RagChatError> {
        let body = ChatRequest {
            messages: &messages,
            temperature: self.temperature,
            stream: true,
        };
        let response = self.deployment.post("chat/completions", &body).await?;

        let stream = try_stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut pending: Vec<u8> = Vec::new();
            'read: while let Some(next) = bytes_stream.next().await {
                let bytes = next.map_err(|e| RagChatError::Provider(format!("stream read: {}", e)))?;
                pending.extend_from_slice(&bytes);

                // Events and multi-byte characters may be split across
                // network chunks; only decode complete lines.
                while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=newline).collect();
                    let line = std::str::from_utf8(&raw)
                        .map_err(|e| RagChatError::Provider(format!("stream is not UTF-8: {}", e)))?
                        .trim();
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    trace!("chunk: {}", data);
                    match parse_sse_data(data.trim()) {
                        Some(fragments) => {
                            for fragment in fragments {
                                yield fragment;
                            }
                        }
                        None => break 'read,
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.deployment.model
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding client for one Azure OpenAI deployment.
#[derive(Clone)]
pub struct AzureOpenAiEmbedding {
    deployment: Deployment,
    dimensions: usize,
}

impl AzureOpenAiEmbedding {
    pub fn new(config: &ModelEndpointConfig) -> Result<Self, RagChatError> {
        let deployment = Deployment::from_config(config)?;
        info!(
            model = %config.model,
            deployment = %config.deployment,
            "Azure OpenAI embedding model configured"
        );
        Ok(Self {
            deployment,
            dimensions: default_dimensions(&config.model),
        })
    }
}

fn default_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

impl EmbeddingService for AzureOpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagChatError> {
        if text.trim().is_empty() {
            return Err(RagChatError::Provider("Cannot embed empty text".to_string()));
        }
        let response = self
            .deployment
            .post("embeddings", &EmbeddingRequest { input: text })
            .await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagChatError::Provider(format!("embedding response: {}", e)))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RagChatError::Provider("embedding response had no data".to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
