use thiserror::Error;

/// Top-level error type for the RAG chat system.
///
/// Subsystem crates return this type directly so that the `?` operator works
/// across crate boundaries. Every variant is terminal for the operation that
/// produced it; nothing in the core retries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RagChatError {
    #[error("Auth is invalid")]
    AuthInvalid,

    #[error("Staging I/O error: {0}")]
    StagingIo(String),

    #[error("Index build failed: {0}")]
    IndexBuild(String),

    #[error("Generation failed: {message}")]
    Generation { message: String, partial: String },

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("No files uploaded")]
    EmptyUpload,

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),

    #[error("Invalid chat mode: {0}")]
    InvalidChatMode(String),

    #[error("Session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("Session state error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RagChatError {
    /// Build a generation failure that keeps the text streamed so far.
    pub fn generation(message: impl Into<String>, partial: impl Into<String>) -> Self {
        RagChatError::Generation {
            message: message.into(),
            partial: partial.into(),
        }
    }
}

impl From<toml::de::Error> for RagChatError {
    fn from(err: toml::de::Error) -> Self {
        RagChatError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for RagChatError {
    fn from(err: toml::ser::Error) -> Self {
        RagChatError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RagChatError {
    fn from(err: serde_json::Error) -> Self {
        RagChatError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for RAG chat operations.
pub type Result<T> = std::result::Result<T, RagChatError>;
