//! Chat engines and the factory that builds them per mode.
//!
//! An engine binds one index, one model, and one conversation memory. Each
//! mode is a strategy for turning the user's message into the messages sent
//! to the model:
//!
//! - `plain`: history plus message, no retrieval.
//! - `context`: retrieve for the message and inject hits as a system prompt.
//! - `condense_plus_context`: condense history and message into a standalone
//!   question, retrieve with it, answer with history and a custom system
//!   prompt.
//! - `condense_question`: condense, retrieve, answer with a history-free
//!   question-answer prompt.
//! - `agentic` / `best`: a bounded reasoning loop that calls the index as a
//!   `query_engine` tool before answering.

use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ragchat_core::config::{ChatConfig, IndexConfig};
use ragchat_core::error::{RagChatError, Result};
use ragchat_core::types::{ChatMessage, ChatMode, RetrievedChunk};
use ragchat_llm::{LlmService, TokenStream};
use ragchat_vector::DocumentIndex;

use crate::memory::ChatMemory;
use crate::prompts;

// =============================================================================
// MemoryPolicy
// =============================================================================

/// How much history an engine keeps between turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPolicy {
    /// Oldest-first eviction once the history exceeds the token budget.
    Bounded { token_limit: usize },
    /// The mode's own history handling, unbounded.
    ModeDefault,
}

impl MemoryPolicy {
    pub fn for_mode(mode: ChatMode, token_limit: usize) -> Self {
        match mode {
            ChatMode::Context | ChatMode::CondensePlusContext => {
                MemoryPolicy::Bounded { token_limit }
            }
            ChatMode::Plain | ChatMode::CondenseQuestion | ChatMode::Best | ChatMode::Agentic => {
                MemoryPolicy::ModeDefault
            }
        }
    }

    fn new_memory(self) -> ChatMemory {
        match self {
            MemoryPolicy::Bounded { token_limit } => ChatMemory::bounded(token_limit),
            MemoryPolicy::ModeDefault => ChatMemory::unbounded(),
        }
    }
}

// =============================================================================
// ChatStream
// =============================================================================

type Completion = Box<dyn FnOnce(String) + Send>;

/// One streamed reply, pulled fragment by fragment.
///
/// The turn is written to the engine's memory when the stream is exhausted.
/// A stream that fails part-way leaves the memory unchanged.
pub struct ChatStream {
    tokens: TokenStream,
    buffer: String,
    sources: Vec<RetrievedChunk>,
    on_complete: Option<Completion>,
}

impl ChatStream {
    fn new(tokens: TokenStream, sources: Vec<RetrievedChunk>, on_complete: Completion) -> Self {
        Self {
            tokens,
            buffer: String::new(),
            sources,
            on_complete: Some(on_complete),
        }
    }

    /// Next fragment, or `None` once the reply is complete.
    pub async fn next_fragment(&mut self) -> Option<Result<String>> {
        match self.tokens.next().await {
            Some(Ok(fragment)) => {
                self.buffer.push_str(&fragment);
                Some(Ok(fragment))
            }
            Some(Err(e)) => {
                self.on_complete = None;
                Some(Err(e))
            }
            None => {
                if let Some(complete) = self.on_complete.take() {
                    complete(self.buffer.clone());
                }
                None
            }
        }
    }

    /// Chunks retrieved while preparing this reply.
    pub fn sources(&self) -> &[RetrievedChunk] {
        &self.sources
    }
}

/// Stream an already known text word by word.
fn replay(text: String) -> TokenStream {
    let fragments: Vec<Result<String>> = text
        .split_inclusive(' ')
        .map(|word| Ok(word.to_string()))
        .collect();
    Box::pin(tokio_stream::iter(fragments))
}

// =============================================================================
// Agent output parsing
// =============================================================================

static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Action:\s*query_engine\s*\n\s*Action Input:\s*(.+?)\s*(?:\n\s*Observation:|$)")
        .expect("Invalid action regex")
});
static ANSWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Answer:\s*(.*)$").expect("Invalid answer regex"));

#[derive(Debug, PartialEq)]
enum AgentStep {
    Action(String),
    Answer(String),
}

/// Classify one reasoning step. Whichever of `Action:` and `Answer:` comes
/// first wins; a reply in neither format is taken as the answer.
fn parse_agent_step(reply: &str) -> AgentStep {
    let action = ACTION_RE.captures(reply);
    let answer = ANSWER_RE.captures(reply);
    match (action, answer) {
        (Some(a), Some(b)) if a.get(0).map(|m| m.start()) < b.get(0).map(|m| m.start()) => {
            AgentStep::Action(a[1].trim().to_string())
        }
        (Some(a), None) => AgentStep::Action(a[1].trim().to_string()),
        (_, Some(b)) => AgentStep::Answer(b[1].trim().to_string()),
        (None, None) => AgentStep::Answer(reply.trim().to_string()),
    }
}

// =============================================================================
// ChatEngine
// =============================================================================

/// Stateful chat engine over one index.
pub struct ChatEngine {
    id: Uuid,
    mode: ChatMode,
    policy: MemoryPolicy,
    index: Arc<DocumentIndex>,
    llm: Arc<dyn LlmService>,
    memory: Arc<Mutex<ChatMemory>>,
    top_k: usize,
    agent_max_iterations: usize,
}

impl std::fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .field("index_id", &self.index.id())
            .field("model", &self.llm.model_name())
            .finish()
    }
}

impl ChatEngine {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn memory_policy(&self) -> MemoryPolicy {
        self.policy
    }

    pub fn index(&self) -> &Arc<DocumentIndex> {
        &self.index
    }

    fn history(&self) -> Result<Vec<ChatMessage>> {
        self.memory
            .lock()
            .map(|m| m.messages().to_vec())
            .map_err(|e| RagChatError::Session(format!("engine memory lock poisoned: {}", e)))
    }

    /// Messages currently held in the engine's memory.
    pub fn memory_len(&self) -> usize {
        self.memory.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Clear the conversation memory. The engine stays bound to its index.
    pub fn reset(&self) -> Result<()> {
        self.memory
            .lock()
            .map_err(|e| RagChatError::Session(format!("engine memory lock poisoned: {}", e)))?
            .reset();
        info!(engine_id = %self.id, "Chat engine memory reset");
        Ok(())
    }

    /// Start a reply to `message`.
    pub async fn stream_chat(&self, message: &str) -> Result<ChatStream> {
        let history = self.history()?;
        debug!(
            engine_id = %self.id,
            mode = %self.mode,
            history = history.len(),
            "Starting chat turn"
        );

        let (messages, sources) = match self.mode {
            ChatMode::Plain => {
                let mut messages = history;
                messages.push(ChatMessage::user(message));
                (messages, Vec::new())
            }
            ChatMode::Context => {
                let chunks = self.index.retrieve(message, self.top_k).await?;
                let system = prompts::render(
                    prompts::CONTEXT_TEMPLATE,
                    &[("context_str", prompts::context_str(&chunks).as_str())],
                );
                (with_system(system, history, message), chunks)
            }
            ChatMode::CondensePlusContext => {
                let question = self.condense(&history, message).await?;
                let chunks = self.index.retrieve(&question, self.top_k).await?;
                let system = prompts::render(
                    prompts::CONDENSE_PLUS_CONTEXT_TEMPLATE,
                    &[("context_str", prompts::context_str(&chunks).as_str())],
                );
                (with_system(system, history, message), chunks)
            }
            ChatMode::CondenseQuestion => {
                let question = self.condense(&history, message).await?;
                let chunks = self.index.retrieve(&question, self.top_k).await?;
                let prompt = prompts::render(
                    prompts::QA_TEMPLATE,
                    &[
                        ("context_str", prompts::context_str(&chunks).as_str()),
                        ("query_str", question.as_str()),
                    ],
                );
                (vec![ChatMessage::user(prompt)], chunks)
            }
            ChatMode::Best | ChatMode::Agentic => {
                return self.run_agent(history, message).await;
            }
        };

        let tokens = self.llm.stream_chat(messages).await?;
        Ok(self.finish(tokens, sources, message))
    }

    /// Rewrite the message as a standalone question. Without history the
    /// message is already standalone.
    async fn condense(&self, history: &[ChatMessage], message: &str) -> Result<String> {
        if history.is_empty() {
            return Ok(message.to_string());
        }
        let prompt = prompts::render(
            prompts::CONDENSE_QUESTION_TEMPLATE,
            &[
                ("chat_history", prompts::chat_history_str(history).as_str()),
                ("question", message),
            ],
        );
        let condensed = self.llm.chat(vec![ChatMessage::user(prompt)]).await?;
        let condensed = condensed.trim();
        debug!(engine_id = %self.id, question = %condensed, "Condensed question");
        if condensed.is_empty() {
            Ok(message.to_string())
        } else {
            Ok(condensed.to_string())
        }
    }

    async fn run_agent(&self, history: Vec<ChatMessage>, message: &str) -> Result<ChatStream> {
        let mut messages = vec![ChatMessage::system(prompts::AGENT_SYSTEM_TEMPLATE)];
        messages.extend(history);
        messages.push(ChatMessage::user(message));
        let mut sources = Vec::new();

        for step in 0..self.agent_max_iterations {
            let reply = self.llm.chat(messages.clone()).await?;
            match parse_agent_step(&reply) {
                AgentStep::Answer(answer) => {
                    debug!(engine_id = %self.id, step, "Agent answered");
                    return Ok(self.finish(replay(answer), sources, message));
                }
                AgentStep::Action(input) => {
                    debug!(engine_id = %self.id, step, input = %input, "Agent querying index");
                    let chunks = self.index.retrieve(&input, self.top_k).await?;
                    let observation = if chunks.is_empty() {
                        "No relevant documents found.".to_string()
                    } else {
                        prompts::context_str(&chunks)
                    };
                    sources.extend(chunks);
                    messages.push(ChatMessage::assistant(reply));
                    messages.push(ChatMessage::user(format!("Observation: {}", observation)));
                }
            }
        }

        warn!(
            engine_id = %self.id,
            iterations = self.agent_max_iterations,
            "Agent hit iteration limit, forcing an answer"
        );
        messages.push(ChatMessage::user(prompts::AGENT_FINAL_INSTRUCTION));
        let reply = self.llm.chat(messages).await?;
        let answer = match parse_agent_step(&reply) {
            AgentStep::Answer(answer) => answer,
            AgentStep::Action(_) => reply.trim().to_string(),
        };
        Ok(self.finish(replay(answer), sources, message))
    }

    fn finish(&self, tokens: TokenStream, sources: Vec<RetrievedChunk>, message: &str) -> ChatStream {
        let memory = Arc::clone(&self.memory);
        let user = ChatMessage::user(message);
        let engine_id = self.id;
        ChatStream::new(
            tokens,
            sources,
            Box::new(move |reply| match memory.lock() {
                Ok(mut memory) => {
                    memory.put(user);
                    memory.put(ChatMessage::assistant(reply));
                }
                Err(e) => warn!(engine_id = %engine_id, "memory lock poisoned: {}", e),
            }),
        )
    }
}

fn with_system(system: String, history: Vec<ChatMessage>, message: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(history);
    messages.push(ChatMessage::user(message));
    messages
}

// =============================================================================
// ChatEngineFactory
// =============================================================================

/// Builds engines for a session's index and mode.
#[derive(Clone)]
pub struct ChatEngineFactory {
    llm: Arc<dyn LlmService>,
    memory_token_limit: usize,
    agent_max_iterations: usize,
    top_k: usize,
}

impl ChatEngineFactory {
    pub fn new(llm: Arc<dyn LlmService>, chat: &ChatConfig, index: &IndexConfig) -> Self {
        Self {
            llm,
            memory_token_limit: chat.memory_token_limit,
            agent_max_iterations: chat.agent_max_iterations.max(1),
            top_k: index.top_k.max(1),
        }
    }

    pub fn build(&self, index: Arc<DocumentIndex>, mode: ChatMode) -> Arc<ChatEngine> {
        let policy = MemoryPolicy::for_mode(mode, self.memory_token_limit);
        let engine = ChatEngine {
            id: Uuid::new_v4(),
            mode,
            policy,
            index,
            llm: Arc::clone(&self.llm),
            memory: Arc::new(Mutex::new(policy.new_memory())),
            top_k: self.top_k,
            agent_max_iterations: self.agent_max_iterations,
        };
        info!(
            engine_id = %engine.id,
            mode = %mode,
            index_id = %engine.index.id(),
            "Chat engine built"
        );
        Arc::new(engine)
    }
}
