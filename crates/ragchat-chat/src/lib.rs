//! Session lifecycle and chat engine state machine for RAG Chat.
//!
//! Coordinates uploads, cached index construction, chat-mode switching,
//! and streamed response assembly on top of the provider capabilities.

pub mod builder;
pub mod capabilities;
pub mod conversation;
pub mod engine;
pub mod memory;
pub mod orchestrator;
pub mod prompts;
pub mod session;

pub use builder::IndexBuilder;
pub use capabilities::Capabilities;
pub use conversation::AssistantTurn;
pub use engine::{ChatEngine, ChatEngineFactory, ChatStream, MemoryPolicy};
pub use memory::ChatMemory;
pub use orchestrator::{IndexSummary, RagChatService, SessionSummary};
pub use session::{PageSessionState, SessionHandle, SessionState, SessionStore};
