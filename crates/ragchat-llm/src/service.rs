//! LLM service trait, stream type, and the mock implementation.

use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_stream::{Stream, StreamExt};

use ragchat_core::error::RagChatError;
use ragchat_core::types::{ChatMessage, Role};

/// Finite, non-restartable sequence of text fragments in arrival order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, RagChatError>> + Send>>;

/// A chat-completion capable model.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Start a streamed completion over the given messages.
    ///
    /// Errors returned here mean the request never started; errors inside
    /// the stream mean it failed part-way.
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, RagChatError>;

    /// Run a completion to the end and return the full text.
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, RagChatError> {
        let stream = self.stream_chat(messages).await?;
        collect_stream(stream).await
    }

    /// Model name, for logging.
    fn model_name(&self) -> &str;
}

/// Drain a token stream into one string.
pub async fn collect_stream(mut stream: TokenStream) -> Result<String, RagChatError> {
    let mut full = String::new();
    while let Some(fragment) = stream.next().await {
        full.push_str(&fragment?);
    }
    Ok(full)
}

// ---------------------------------------------------------------------------
// MockLlm - deterministic responses for tests and offline runs
// ---------------------------------------------------------------------------

type Responder = dyn Fn(&[ChatMessage]) -> String + Send + Sync;

/// Mock model that answers through a caller-supplied function and streams
/// the answer one word at a time.
///
/// Every request is recorded so tests can assert on what the engine sent.
#[derive(Clone)]
pub struct MockLlm {
    responder: Arc<Responder>,
    fail_after: Option<usize>,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl std::fmt::Debug for MockLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLlm")
            .field("fail_after", &self.fail_after)
            .finish()
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::echo()
    }
}

impl MockLlm {
    /// Answer with the last user message, followed by any system context.
    pub fn echo() -> Self {
        Self::with_responder(|messages| {
            let question = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            let context: Vec<&str> = messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| m.content.as_str())
                .collect();
            if context.is_empty() {
                format!("You asked: {}", question)
            } else {
                format!("You asked: {}\n\n{}", question, context.join("\n"))
            }
        })
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> String + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            fail_after: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every stream fail after yielding `fragments` fragments.
    pub fn fail_after(mut self, fragments: usize) -> Self {
        self.fail_after = Some(fragments);
        self
    }

    /// Every message list sent so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmService for MockLlm {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, RagChatError> {
        let reply = (self.responder)(&messages);
        self.requests
            .lock()
            .map_err(|e| RagChatError::Provider(format!("mock lock poisoned: {}", e)))?
            .push(messages);

        let mut fragments: Vec<Result<String, RagChatError>> = reply
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        if let Some(limit) = self.fail_after {
            fragments.truncate(limit);
            fragments.push(Err(RagChatError::Provider(
                "mock stream interrupted".to_string(),
            )));
        }
        Ok(Box::pin(tokio_stream::iter(fragments)))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
