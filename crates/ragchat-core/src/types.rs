use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RagChatError;

// =============================================================================
// Enums
// =============================================================================

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Instructions injected ahead of the conversation.
    System,
    /// The human asking questions.
    User,
    /// The model answering.
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retrieval and memory strategy a chat engine is built with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Talk to the model directly, no retrieval.
    #[default]
    Plain,
    /// Retrieve for every message and inject the hits as system context.
    Context,
    /// Condense the conversation into a standalone question, then retrieve.
    CondensePlusContext,
    /// Condense, then answer through a history-free question-answer prompt.
    CondenseQuestion,
    /// Let the engine pick; resolves to the agentic strategy.
    Best,
    /// Reasoning loop that calls the document index as a tool.
    Agentic,
}

impl ChatMode {
    /// Every selectable mode, in menu order.
    pub const ALL: [ChatMode; 6] = [
        ChatMode::Plain,
        ChatMode::Context,
        ChatMode::CondensePlusContext,
        ChatMode::CondenseQuestion,
        ChatMode::Best,
        ChatMode::Agentic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Plain => "plain",
            ChatMode::Context => "context",
            ChatMode::CondensePlusContext => "condense_plus_context",
            ChatMode::CondenseQuestion => "condense_question",
            ChatMode::Best => "best",
            ChatMode::Agentic => "agentic",
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = RagChatError;

    /// Accepts snake_case, kebab-case, and the legacy names `openai`,
    /// `simple` and `react`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "plain" | "openai" | "simple" => Ok(ChatMode::Plain),
            "context" => Ok(ChatMode::Context),
            "condense_plus_context" => Ok(ChatMode::CondensePlusContext),
            "condense_question" => Ok(ChatMode::CondenseQuestion),
            "best" => Ok(ChatMode::Best),
            "agentic" | "react" => Ok(ChatMode::Agentic),
            _ => Err(RagChatError::InvalidChatMode(s.to_string())),
        }
    }
}

// =============================================================================
// Identity and transcript
// =============================================================================

/// Stable user identity extracted from a validated credential.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserIdentity(String);

impl UserIdentity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the visible transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

// =============================================================================
// Uploads and documents
// =============================================================================

/// A single uploaded file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// An ordered batch of uploaded files.
///
/// Two sets with the same names and bytes in the same order share a
/// fingerprint, which is what the index cache keys on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadedFileSet {
    files: Vec<UploadedFile>,
}

impl UploadedFileSet {
    pub fn new(files: Vec<UploadedFile>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Hex SHA-256 over every file's name, length and bytes.
    ///
    /// Lengths are hashed as fixed-width prefixes so that moving bytes
    /// between a name and a body can't produce the same digest.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for file in &self.files {
            hasher.update((file.name.len() as u64).to_le_bytes());
            hasher.update(file.name.as_bytes());
            hasher.update((file.content.len() as u64).to_le_bytes());
            hasher.update(&file.content);
        }
        hex::encode(hasher.finalize())
    }
}

impl FromIterator<UploadedFile> for UploadedFileSet {
    fn from_iter<I: IntoIterator<Item = UploadedFile>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Normalized text produced by the document loader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// File name the text was read from, relative to the staging directory.
    pub file_name: String,
    pub text: String,
}

/// A chunk returned by index retrieval, best match first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub file_name: String,
    pub text: String,
    /// Cosine similarity in [-1.0, 1.0].
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_mode_round_trips_wire_names() {
        for mode in ChatMode::ALL {
            assert_eq!(mode.as_str().parse::<ChatMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_chat_mode_accepts_legacy_and_kebab_names() {
        assert_eq!("openai".parse::<ChatMode>().unwrap(), ChatMode::Plain);
        assert_eq!("react".parse::<ChatMode>().unwrap(), ChatMode::Agentic);
        assert_eq!(
            "condense-plus-context".parse::<ChatMode>().unwrap(),
            ChatMode::CondensePlusContext
        );
        assert_eq!(" Context ".parse::<ChatMode>().unwrap(), ChatMode::Context);
    }

    #[test]
    fn test_chat_mode_rejects_unknown() {
        let err = "turbo".parse::<ChatMode>().unwrap_err();
        assert!(matches!(err, RagChatError::InvalidChatMode(ref m) if m == "turbo"));
    }

    #[test]
    fn test_chat_mode_serde_snake_case() {
        let json = serde_json::to_string(&ChatMode::CondensePlusContext).unwrap();
        assert_eq!(json, "\"condense_plus_context\"");
        let mode: ChatMode = serde_json::from_str("\"condense_question\"").unwrap();
        assert_eq!(mode, ChatMode::CondenseQuestion);
    }

    #[test]
    fn test_fingerprint_is_content_based() {
        let a: UploadedFileSet = vec![UploadedFile::new("a.txt", "Paris")].into_iter().collect();
        let b: UploadedFileSet = vec![UploadedFile::new("a.txt", "Paris")].into_iter().collect();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_differs_on_content_name_and_order() {
        let base = UploadedFileSet::new(vec![
            UploadedFile::new("a.txt", "one"),
            UploadedFile::new("b.txt", "two"),
        ]);
        let content = UploadedFileSet::new(vec![
            UploadedFile::new("a.txt", "one"),
            UploadedFile::new("b.txt", "TWO"),
        ]);
        let renamed = UploadedFileSet::new(vec![
            UploadedFile::new("a.txt", "one"),
            UploadedFile::new("c.txt", "two"),
        ]);
        let reordered = UploadedFileSet::new(vec![
            UploadedFile::new("b.txt", "two"),
            UploadedFile::new("a.txt", "one"),
        ]);
        assert_ne!(base.fingerprint(), content.fingerprint());
        assert_ne!(base.fingerprint(), renamed.fingerprint());
        assert_ne!(base.fingerprint(), reordered.fingerprint());
    }

    #[test]
    fn test_fingerprint_name_body_boundary() {
        let a = UploadedFileSet::new(vec![UploadedFile::new("ab", "c")]);
        let b = UploadedFileSet::new(vec![UploadedFile::new("a", "bc")]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_chat_message_constructors() {
        assert_eq!(ChatMessage::user("hi").role, Role::User);
        assert_eq!(ChatMessage::assistant("hello").role, Role::Assistant);
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
