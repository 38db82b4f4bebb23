use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RagChatError, Result};
use crate::types::ChatMode;

/// Subdirectory of the data directory that uploads are staged into.
pub const STAGING_SUBDIR: &str = "ragchat_dir";

/// Top-level configuration for the RAG chat service.
///
/// Loaded from a TOML file, then overlaid with environment variables via
/// [`RagChatConfig::apply_env`]. Each section corresponds to one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagChatConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub llm: ModelEndpointConfig,
    #[serde(default = "ModelEndpointConfig::embedding_default")]
    pub embedding: ModelEndpointConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for RagChatConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            auth: AuthConfig::default(),
            llm: ModelEndpointConfig::default(),
            embedding: ModelEndpointConfig::embedding_default(),
            index: IndexConfig::default(),
            chat: ChatConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl RagChatConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RagChatConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| RagChatError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary variable source.
    ///
    /// The generation endpoint triple (`AZURE_OPENAI_*`) also feeds the
    /// embedding model unless `AZURE_OPENAI_EMBEDDING_*` overrides it.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(secret) = get("APP_SECRET") {
            self.auth.secret = secret;
        }
        if let Some(dir) = get("DATA_DIR") {
            self.general.data_dir = dir;
        }
        if let Some(level) = get("RAGCHAT_LOG_LEVEL") {
            self.general.log_level = level;
        }
        if let Some(port) = get("RAGCHAT_PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.general.port = port;
        }

        if let Some(endpoint) = get("AZURE_OPENAI_ENDPOINT") {
            self.llm.endpoint = endpoint.clone();
            self.embedding.endpoint = endpoint;
        }
        if let Some(key) = get("AZURE_OPENAI_API_KEY") {
            self.llm.api_key = key.clone();
            self.embedding.api_key = key;
        }
        if let Some(version) = get("AZURE_OPENAI_API_VERSION") {
            self.llm.api_version = version.clone();
            self.embedding.api_version = version;
        }

        if let Some(endpoint) = get("AZURE_OPENAI_EMBEDDING_ENDPOINT") {
            self.embedding.endpoint = endpoint;
        }
        if let Some(key) = get("AZURE_OPENAI_EMBEDDING_API_KEY") {
            self.embedding.api_key = key;
        }
        if let Some(version) = get("AZURE_OPENAI_EMBEDDING_API_VERSION") {
            self.embedding.api_version = version;
        }
    }

    /// Check that every value needed to construct the provider bindings and
    /// the auth gate is present.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.auth.secret.is_empty() {
            missing.push("auth.secret (APP_SECRET)");
        }
        if self.llm.endpoint.is_empty() {
            missing.push("llm.endpoint (AZURE_OPENAI_ENDPOINT)");
        }
        if self.llm.api_key.is_empty() {
            missing.push("llm.api_key (AZURE_OPENAI_API_KEY)");
        }
        if self.llm.api_version.is_empty() {
            missing.push("llm.api_version (AZURE_OPENAI_API_VERSION)");
        }
        if self.embedding.endpoint.is_empty() {
            missing.push("embedding.endpoint");
        }
        if self.embedding.api_key.is_empty() {
            missing.push("embedding.api_key");
        }
        if self.embedding.api_version.is_empty() {
            missing.push("embedding.api_version");
        }
        if self.index.chunk_overlap >= self.index.chunk_size {
            return Err(RagChatError::Config(format!(
                "index.chunk_overlap ({}) must be smaller than index.chunk_size ({})",
                self.index.chunk_overlap, self.index.chunk_size
            )));
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RagChatError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }

    /// Directory uploads are written into before loading.
    pub fn staging_dir(&self) -> PathBuf {
        resolve_data_dir(&self.general.data_dir).join(STAGING_SUBDIR)
    }
}

/// Expand a leading `~` to the home directory.
pub fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if let Some(rest) = data_dir
        .strip_prefix("~/")
        .or_else(|| data_dir.strip_prefix("~\\"))
    {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(data_dir)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Base data directory; uploads are staged under `ragchat_dir/`.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Address the HTTP server binds to.
    pub host: String,
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "/tmp/ragchat".to_string(),
            log_level: "info".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

/// Credential verification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the token issuer.
    pub secret: String,
}

/// Azure OpenAI deployment binding for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelEndpointConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub deployment: String,
    pub model: String,
    /// Sampling temperature. Ignored for embeddings.
    pub temperature: f32,
    /// Connect and per-read timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ModelEndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            api_version: String::new(),
            deployment: "gpt-4-turbo-preview".to_string(),
            model: "gpt-4-turbo-preview".to_string(),
            temperature: 0.1,
            timeout_secs: 120,
        }
    }
}

impl ModelEndpointConfig {
    fn embedding_default() -> Self {
        Self {
            deployment: "text-embedding-3-large".to_string(),
            model: "text-embedding-3-large".to_string(),
            temperature: 0.0,
            ..Self::default()
        }
    }
}

/// Index building and retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// How long a built index stays reusable for the same upload, in seconds.
    pub cache_ttl_secs: u64,
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per query.
    pub top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            chunk_size: 1024,
            chunk_overlap: 200,
            top_k: 2,
        }
    }
}

/// Chat engine and conversation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Mode a new session starts in.
    pub default_mode: ChatMode,
    /// Token budget of the bounded memory used by context modes.
    pub memory_token_limit: usize,
    /// Maximum prompt length in characters.
    pub max_message_length: usize,
    /// Assistant message seeded into an empty transcript.
    pub welcome_message: String,
    /// Upper bound on tool calls per agentic turn.
    pub agent_max_iterations: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_mode: ChatMode::Plain,
            memory_token_limit: 32_000,
            max_message_length: 4000,
            welcome_message: "Welcome to RAG Chat! ".to_string(),
            agent_max_iterations: 3,
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle for longer than this are dropped.
    pub idle_timeout_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn complete_env() -> impl Fn(&str) -> Option<String> {
        env(&[
            ("APP_SECRET", "s3cret"),
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "key"),
            ("AZURE_OPENAI_API_VERSION", "2024-02-01"),
        ])
    }

    #[test]
    fn test_default_config() {
        let config = RagChatConfig::default();
        assert_eq!(config.general.data_dir, "/tmp/ragchat");
        assert_eq!(config.general.port, 8501);
        assert_eq!(config.index.cache_ttl_secs, 3600);
        assert_eq!(config.chat.memory_token_limit, 32_000);
        assert_eq!(config.chat.default_mode, ChatMode::Plain);
        assert_eq!(config.chat.welcome_message, "Welcome to RAG Chat! ");
    }

    #[test]
    fn test_embedding_section_defaults_to_embedding_model() {
        let config: RagChatConfig = toml::from_str("").unwrap();
        assert_eq!(config.embedding.deployment, "text-embedding-3-large");
        assert_eq!(config.llm.deployment, "gpt-4-turbo-preview");
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "debug"

[chat]
default_mode = "condense_plus_context"
"#;
        let file = create_temp_config(content);
        let config = RagChatConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.chat.default_mode, ChatMode::CondensePlusContext);
        assert_eq!(config.index.top_k, 2);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("general = [[[");
        assert!(matches!(
            RagChatConfig::load(file.path()),
            Err(RagChatError::Config(_))
        ));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = RagChatConfig::load_or_default(Path::new("/nonexistent/ragchat.toml"));
        assert_eq!(config.general.data_dir, "/tmp/ragchat");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ragchat.toml");

        let mut config = RagChatConfig::default();
        config.index.top_k = 5;
        config.save(&path).unwrap();

        let reloaded = RagChatConfig::load(&path).unwrap();
        assert_eq!(reloaded.index.top_k, 5);
        assert_eq!(reloaded.embedding.model, config.embedding.model);
    }

    #[test]
    fn test_apply_env_shares_provider_triple() {
        let mut config = RagChatConfig::default();
        config.apply_env_from(complete_env());
        assert_eq!(config.auth.secret, "s3cret");
        assert_eq!(config.llm.endpoint, "https://example.openai.azure.com");
        assert_eq!(config.embedding.endpoint, "https://example.openai.azure.com");
        assert_eq!(config.embedding.api_version, "2024-02-01");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_env_embedding_override() {
        let mut config = RagChatConfig::default();
        config.apply_env_from(complete_env());
        config.apply_env_from(env(&[(
            "AZURE_OPENAI_EMBEDDING_ENDPOINT",
            "https://embed.openai.azure.com",
        )]));
        assert_eq!(config.llm.endpoint, "https://example.openai.azure.com");
        assert_eq!(config.embedding.endpoint, "https://embed.openai.azure.com");
    }

    #[test]
    fn test_apply_env_data_dir_and_blank_values() {
        let mut config = RagChatConfig::default();
        config.apply_env_from(env(&[("DATA_DIR", "/srv/ragchat"), ("APP_SECRET", "  ")]));
        assert_eq!(config.general.data_dir, "/srv/ragchat");
        assert!(config.auth.secret.is_empty());
        assert_eq!(
            config.staging_dir(),
            PathBuf::from("/srv/ragchat").join(STAGING_SUBDIR)
        );
    }

    #[test]
    fn test_validate_reports_missing_values() {
        let err = RagChatConfig::default().validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("APP_SECRET"));
        assert!(msg.contains("AZURE_OPENAI_ENDPOINT"));
    }

    #[test]
    fn test_validate_rejects_overlap_not_smaller_than_chunk() {
        let mut config = RagChatConfig::default();
        config.apply_env_from(complete_env());
        config.index.chunk_overlap = config.index.chunk_size;
        assert!(matches!(config.validate(), Err(RagChatError::Config(_))));
    }

    #[test]
    fn test_resolve_data_dir_plain_path() {
        assert_eq!(resolve_data_dir("/data"), PathBuf::from("/data"));
    }
}
