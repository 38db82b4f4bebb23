//! Conversation memory carried by a chat engine between turns.

use ragchat_core::types::ChatMessage;

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Ordered message history, optionally capped by a token budget.
///
/// When bounded, the oldest messages are evicted until the history fits.
#[derive(Debug, Clone, Default)]
pub struct ChatMemory {
    token_limit: Option<usize>,
    messages: Vec<ChatMessage>,
}

impl ChatMemory {
    pub fn bounded(token_limit: usize) -> Self {
        Self {
            token_limit: Some(token_limit),
            messages: Vec::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn token_limit(&self) -> Option<usize> {
        self.token_limit
    }

    pub fn put(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.evict();
    }

    fn evict(&mut self) {
        let Some(limit) = self.token_limit else {
            return;
        };
        let mut total: usize = self.token_count();
        let mut drop = 0;
        while total > limit && drop < self.messages.len() {
            total -= estimate_tokens(&self.messages[drop].content);
            drop += 1;
        }
        if drop > 0 {
            self.messages.drain(..drop);
        }
    }

    pub fn token_count(&self) -> usize {
        self.messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }
}
