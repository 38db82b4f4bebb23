//! Streamed response assembly for one conversation turn.

use serde::Serialize;
use tracing::{debug, warn};

use ragchat_core::error::{RagChatError, Result};
use ragchat_core::types::{ChatMessage, RetrievedChunk, Role};

use crate::engine::ChatEngine;

/// A completed assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantTurn {
    pub content: String,
    /// Chunks the reply was grounded on, best match first.
    pub sources: Vec<RetrievedChunk>,
}

/// Reject prompts that are blank or longer than `max_len` characters.
pub fn validate_prompt(prompt: &str, max_len: usize) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(RagChatError::EmptyMessage);
    }
    if prompt.chars().count() > max_len {
        return Err(RagChatError::MessageTooLong(max_len));
    }
    Ok(())
}

/// The user message awaiting a reply, if the transcript ends with one.
pub fn pending_prompt(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .last()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}

/// Pull the engine's reply to `prompt` to the end.
///
/// `on_partial` sees the accumulated text after every fragment and once
/// more when the stream ends. Any failure, before or during streaming,
/// becomes [`RagChatError::Generation`] carrying the text received so far.
pub async fn run_turn<F>(engine: &ChatEngine, prompt: &str, on_partial: &mut F) -> Result<AssistantTurn>
where
    F: FnMut(&str),
{
    let mut stream = engine.stream_chat(prompt).await.map_err(|e| {
        warn!(engine_id = %engine.id(), "Chat turn failed to start: {}", e);
        RagChatError::generation(e.to_string(), "")
    })?;

    let mut full = String::new();
    let mut fragments = 0usize;
    while let Some(next) = stream.next_fragment().await {
        match next {
            Ok(fragment) => {
                full.push_str(&fragment);
                fragments += 1;
                on_partial(&full);
            }
            Err(e) => {
                warn!(
                    engine_id = %engine.id(),
                    received = full.len(),
                    "Chat stream failed: {}", e
                );
                return Err(RagChatError::generation(e.to_string(), full));
            }
        }
    }
    on_partial(&full);
    debug!(engine_id = %engine.id(), fragments, chars = full.len(), "Chat turn complete");

    Ok(AssistantTurn {
        content: full,
        sources: stream.sources().to_vec(),
    })
}
