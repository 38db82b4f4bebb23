//! RAG chat service: the page-level state machine over a session.
//!
//! Every operation first makes sure the page attributes exist, so a session
//! can be driven in any order. The attributes live under the `ragchat`
//! namespace:
//!
//! | name          | type                          | default            |
//! |---------------|-------------------------------|--------------------|
//! | `index`       | `Option<Arc<DocumentIndex>>`  | `None`             |
//! | `chat_mode`   | `ChatMode`                    | `chat.default_mode`|
//! | `chat_engine` | `Option<Arc<ChatEngine>>`     | `None`             |
//! | `app_uid`     | `Option<UserIdentity>`        | `None`             |
//!
//! plus the `messages` transcript.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ragchat_core::config::{ChatConfig, RagChatConfig};
use ragchat_core::error::{RagChatError, Result};
use ragchat_core::types::{ChatMessage, ChatMode, UploadedFileSet, UserIdentity};
use ragchat_vector::{DirectoryLoader, DocumentIndex, EmbeddingIndexConstructor};

use crate::builder::IndexBuilder;
use crate::capabilities::Capabilities;
use crate::conversation::{self, AssistantTurn};
use crate::engine::{ChatEngine, ChatEngineFactory};
use crate::session::{PageSessionState, SessionState};

pub const NAMESPACE: &str = "ragchat";
pub const MESSAGES: &str = "messages";
const INDEX: &str = "index";
const CHAT_MODE: &str = "chat_mode";
const CHAT_ENGINE: &str = "chat_engine";
const APP_UID: &str = "app_uid";

type IndexAttr = Option<Arc<DocumentIndex>>;
type EngineAttr = Option<Arc<ChatEngine>>;
type UidAttr = Option<UserIdentity>;

/// Index details exposed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub id: Uuid,
    pub document_count: usize,
    pub chunk_count: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexSummary {
    pub fn of(index: &DocumentIndex) -> Self {
        Self {
            id: index.id(),
            document_count: index.document_count(),
            chunk_count: index.chunk_count(),
            built_at: index.built_at(),
        }
    }
}

/// Snapshot of one session's page state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub chat_mode: ChatMode,
    pub index: Option<IndexSummary>,
    pub engine_id: Option<Uuid>,
    pub message_count: usize,
    pub uid: Option<UserIdentity>,
}

/// Drives uploads, mode changes, resets and chat turns for sessions.
pub struct RagChatService {
    chat: ChatConfig,
    builder: Arc<IndexBuilder>,
    factory: ChatEngineFactory,
}

impl RagChatService {
    /// Wire the default loader and constructor over the given models.
    pub fn new(config: &RagChatConfig, capabilities: Capabilities) -> Self {
        let constructor = EmbeddingIndexConstructor::new(
            Arc::clone(&capabilities.embedder),
            config.index.chunk_size,
            config.index.chunk_overlap,
        );
        let builder = IndexBuilder::new(
            config.staging_dir(),
            Arc::new(DirectoryLoader::default()),
            Arc::new(constructor),
            Duration::from_secs(config.index.cache_ttl_secs),
        );
        let factory = ChatEngineFactory::new(capabilities.llm, &config.chat, &config.index);
        Self::with_parts(config.chat.clone(), Arc::new(builder), factory)
    }

    pub fn with_parts(
        chat: ChatConfig,
        builder: Arc<IndexBuilder>,
        factory: ChatEngineFactory,
    ) -> Self {
        Self {
            chat,
            builder,
            factory,
        }
    }

    pub fn index_builder(&self) -> &Arc<IndexBuilder> {
        &self.builder
    }

    /// Declare the page attributes and seed the welcome message.
    fn page<'a>(&self, state: &'a mut SessionState) -> PageSessionState<'a> {
        let mut page = state.page(NAMESPACE);
        page.initn_attr::<IndexAttr>(INDEX, None);
        page.initn_attr(CHAT_MODE, self.chat.default_mode);
        page.initn_attr::<EngineAttr>(CHAT_ENGINE, None);
        page.initn_attr::<UidAttr>(APP_UID, None);
        if page.chat_msgs(MESSAGES).is_empty() {
            page.add_chat_msg(MESSAGES, ChatMessage::assistant(&self.chat.welcome_message));
        }
        page
    }

    /// Pin `identity` to the session, or check it against the pinned one.
    pub fn authenticate(&self, state: &mut SessionState, identity: &UserIdentity) -> Result<()> {
        let mut page = self.page(state);
        match page.get::<UidAttr>(APP_UID)? {
            Some(pinned) if pinned == identity => Ok(()),
            Some(pinned) => {
                warn!(
                    session_id = %page.session_id(),
                    pinned = %pinned.as_str(),
                    "Credential for another user rejected"
                );
                Err(RagChatError::AuthInvalid)
            }
            None => {
                info!(session_id = %page.session_id(), uid = %identity.as_str(), "Session authenticated");
                page.set::<UidAttr>(APP_UID, Some(identity.clone()))
            }
        }
    }

    /// Build or reuse the index for an upload batch. An empty batch changes
    /// nothing and returns `None`.
    ///
    /// A new index drops the current engine; the next turn builds one with
    /// the session's mode.
    pub async fn upload(
        &self,
        state: &mut SessionState,
        files: &UploadedFileSet,
    ) -> Result<Option<Arc<DocumentIndex>>> {
        let mut page = self.page(state);
        if files.is_empty() {
            debug!(session_id = %page.session_id(), "Empty upload ignored");
            return Ok(None);
        }

        let index = self.builder.configure_index(files).await?;
        let changed = page
            .get::<IndexAttr>(INDEX)?
            .as_ref()
            .map(|current| current.id() != index.id())
            .unwrap_or(true);
        if changed {
            page.set::<IndexAttr>(INDEX, Some(Arc::clone(&index)))?;
            page.set::<EngineAttr>(CHAT_ENGINE, None)?;
            info!(
                session_id = %page.session_id(),
                index_id = %index.id(),
                "Session index configured"
            );
        }
        Ok(Some(index))
    }

    /// Switch the session's chat mode and rebuild its engine.
    ///
    /// Without an index the mode is only recorded; the engine is built on the
    /// first turn after an upload. Returns the new engine's id, if any.
    pub fn change_mode(&self, state: &mut SessionState, mode: ChatMode) -> Result<Option<Uuid>> {
        let mut page = self.page(state);
        page.set(CHAT_MODE, mode)?;
        let index = page.get::<IndexAttr>(INDEX)?.clone();
        let engine = index.map(|index| self.factory.build(index, mode));
        let engine_id = engine.as_ref().map(|e| e.id());
        page.set::<EngineAttr>(CHAT_ENGINE, engine)?;
        info!(session_id = %page.session_id(), mode = %mode, "Chat mode changed");
        Ok(engine_id)
    }

    /// Clear the transcript and the engine's memory. The welcome message is
    /// seeded again.
    pub fn reset(&self, state: &mut SessionState) -> Result<()> {
        let mut page = self.page(state);
        if let Some(engine) = page.get::<EngineAttr>(CHAT_ENGINE)? {
            engine.reset()?;
        }
        page.clear_chat_msgs(MESSAGES);
        page.add_chat_msg(MESSAGES, ChatMessage::assistant(&self.chat.welcome_message));
        info!(session_id = %page.session_id(), "Conversation reset");
        Ok(())
    }

    pub fn messages(&self, state: &mut SessionState) -> Vec<ChatMessage> {
        self.page(state).chat_msgs(MESSAGES).to_vec()
    }

    pub fn summary(&self, state: &mut SessionState) -> Result<SessionSummary> {
        let page = self.page(state);
        Ok(SessionSummary {
            session_id: page.session_id(),
            chat_mode: *page.get::<ChatMode>(CHAT_MODE)?,
            index: page
                .get::<IndexAttr>(INDEX)?
                .as_deref()
                .map(IndexSummary::of),
            engine_id: page.get::<EngineAttr>(CHAT_ENGINE)?.as_ref().map(|e| e.id()),
            message_count: page.chat_msgs(MESSAGES).len(),
            uid: page.get::<UidAttr>(APP_UID)?.clone(),
        })
    }

    /// Accept an optional prompt and answer the pending user message.
    ///
    /// Returns `Ok(None)` when the transcript does not end with a user
    /// message, so calling again after a completed turn does nothing. On
    /// failure the partial reply is recorded as the assistant turn and the
    /// error is returned; nothing is retried.
    pub async fn submit<F>(
        &self,
        state: &mut SessionState,
        prompt: Option<&str>,
        mut on_partial: F,
    ) -> Result<Option<AssistantTurn>>
    where
        F: FnMut(&str) + Send,
    {
        if let Some(prompt) = prompt {
            conversation::validate_prompt(prompt, self.chat.max_message_length)?;
        }
        let mut page = self.page(state);

        let index = page
            .get::<IndexAttr>(INDEX)?
            .clone()
            .ok_or_else(|| RagChatError::NotReady("upload files to configure an index first".to_string()))?;
        let engine = match page.get::<EngineAttr>(CHAT_ENGINE)?.clone() {
            Some(engine) => engine,
            None => {
                let mode = *page.get::<ChatMode>(CHAT_MODE)?;
                let engine = self.factory.build(index, mode);
                page.set::<EngineAttr>(CHAT_ENGINE, Some(Arc::clone(&engine)))?;
                engine
            }
        };

        if let Some(prompt) = prompt {
            page.add_chat_msg(MESSAGES, ChatMessage::user(prompt));
        }
        let Some(pending) = conversation::pending_prompt(page.chat_msgs(MESSAGES)).map(str::to_string)
        else {
            return Ok(None);
        };

        match conversation::run_turn(&engine, &pending, &mut on_partial).await {
            Ok(turn) => {
                page.add_chat_msg(MESSAGES, ChatMessage::assistant(&turn.content));
                Ok(Some(turn))
            }
            Err(RagChatError::Generation { message, partial }) => {
                page.add_chat_msg(MESSAGES, ChatMessage::assistant(&partial));
                Err(RagChatError::Generation { message, partial })
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ragchat_core::types::{Role, UploadedFile};
    use ragchat_llm::MockLlm;
    use ragchat_vector::MockEmbedding;

    use super::*;

    fn service(dir: &std::path::Path, llm: MockLlm) -> RagChatService {
        let mut config = RagChatConfig::default();
        config.general.data_dir = dir.display().to_string();
        let capabilities = Capabilities::new(Arc::new(llm), Arc::new(MockEmbedding::new()));
        RagChatService::new(&config, capabilities)
    }

    fn batch() -> UploadedFileSet {
        UploadedFileSet::new(vec![UploadedFile::new(
            "france.txt",
            "Paris is the capital of France",
        )])
    }

    #[tokio::test]
    async fn test_welcome_message_is_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut state = SessionState::new(Uuid::new_v4());
        let messages = svc.messages(&mut state);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content, "Welcome to RAG Chat! ");
    }

    #[tokio::test]
    async fn test_submit_before_upload_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut state = SessionState::new(Uuid::new_v4());
        let err = svc.submit(&mut state, Some("hi"), |_| {}).await.unwrap_err();
        assert!(matches!(err, RagChatError::NotReady(_)));
        assert_eq!(svc.messages(&mut state).len(), 1);
    }

    #[tokio::test]
    async fn test_full_turn_appends_user_and_assistant() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut state = SessionState::new(Uuid::new_v4());
        svc.upload(&mut state, &batch()).await.unwrap();

        let partials = Mutex::new(Vec::new());
        let turn = svc
            .submit(&mut state, Some("capital?"), |p| partials.lock().unwrap().push(p.to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(turn.content, "You asked: capital?");

        let messages = svc.messages(&mut state);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1], ChatMessage::user("capital?"));
        assert_eq!(messages[2], ChatMessage::assistant("You asked: capital?"));
        let partials = partials.into_inner().unwrap();
        assert_eq!(partials.last().unwrap(), "You asked: capital?");
    }

    #[tokio::test]
    async fn test_resubmit_without_prompt_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::echo();
        let svc = service(dir.path(), llm.clone());
        let mut state = SessionState::new(Uuid::new_v4());
        svc.upload(&mut state, &batch()).await.unwrap();
        svc.submit(&mut state, Some("q"), |_| {}).await.unwrap();

        assert!(svc.submit(&mut state, None, |_| {}).await.unwrap().is_none());
        assert_eq!(llm.call_count(), 1);
        assert_eq!(svc.messages(&mut state).len(), 3);
    }

    #[tokio::test]
    async fn test_generation_failure_records_partial() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::with_responder(|_| "alpha beta gamma".to_string()).fail_after(1);
        let svc = service(dir.path(), llm.clone());
        let mut state = SessionState::new(Uuid::new_v4());
        svc.upload(&mut state, &batch()).await.unwrap();

        let err = svc.submit(&mut state, Some("q"), |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            RagChatError::Generation { ref partial, .. } if partial == "alpha "
        ));
        let messages = svc.messages(&mut state);
        assert_eq!(messages.last().unwrap(), &ChatMessage::assistant("alpha "));

        // Nothing is pending, so nothing is retried.
        assert!(svc.submit(&mut state, None, |_| {}).await.unwrap().is_none());
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_prompts_leave_transcript_alone() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut state = SessionState::new(Uuid::new_v4());
        svc.upload(&mut state, &batch()).await.unwrap();

        assert!(matches!(
            svc.submit(&mut state, Some("  "), |_| {}).await,
            Err(RagChatError::EmptyMessage)
        ));
        let long = "x".repeat(ChatConfig::default().max_message_length + 1);
        assert!(matches!(
            svc.submit(&mut state, Some(long.as_str()), |_| {}).await,
            Err(RagChatError::MessageTooLong(_))
        ));
        assert_eq!(svc.messages(&mut state).len(), 1);
    }

    #[tokio::test]
    async fn test_change_mode_builds_fresh_engine() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut state = SessionState::new(Uuid::new_v4());
        svc.upload(&mut state, &batch()).await.unwrap();

        let first = svc.change_mode(&mut state, ChatMode::Context).unwrap().unwrap();
        let second = svc.change_mode(&mut state, ChatMode::Context).unwrap().unwrap();
        assert_ne!(first, second);

        let summary = svc.summary(&mut state).unwrap();
        assert_eq!(summary.chat_mode, ChatMode::Context);
        assert_eq!(summary.engine_id, Some(second));
    }

    #[tokio::test]
    async fn test_context_answer_then_switch_keeps_index() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut state = SessionState::new(Uuid::new_v4());
        let index = svc.upload(&mut state, &batch()).await.unwrap().unwrap();

        let context_engine = svc.change_mode(&mut state, ChatMode::Context).unwrap();
        let turn = svc
            .submit(&mut state, Some("What is the capital of France?"), |_| {})
            .await
            .unwrap()
            .unwrap();
        assert!(turn.content.contains("Paris"));
        assert_eq!(turn.sources[0].file_name, "france.txt");

        let cpc_engine = svc
            .change_mode(&mut state, ChatMode::CondensePlusContext)
            .unwrap();
        assert!(cpc_engine.is_some());
        assert_ne!(cpc_engine, context_engine);
        let summary = svc.summary(&mut state).unwrap();
        assert_eq!(summary.index.unwrap().id, index.id());
        assert_eq!(summary.chat_mode, ChatMode::CondensePlusContext);
    }

    #[tokio::test]
    async fn test_change_mode_without_index_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut state = SessionState::new(Uuid::new_v4());
        assert_eq!(svc.change_mode(&mut state, ChatMode::Agentic).unwrap(), None);

        svc.upload(&mut state, &batch()).await.unwrap();
        svc.submit(&mut state, Some("hi"), |_| {}).await.unwrap();
        let summary = svc.summary(&mut state).unwrap();
        assert_eq!(summary.chat_mode, ChatMode::Agentic);
        assert!(summary.engine_id.is_some());
    }

    #[tokio::test]
    async fn test_reset_clears_transcript_and_keeps_engine() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut state = SessionState::new(Uuid::new_v4());
        svc.upload(&mut state, &batch()).await.unwrap();
        svc.submit(&mut state, Some("hi"), |_| {}).await.unwrap();
        let engine_id = svc.summary(&mut state).unwrap().engine_id;

        svc.reset(&mut state).unwrap();
        let messages = svc.messages(&mut state);
        assert_eq!(messages, vec![ChatMessage::assistant("Welcome to RAG Chat! ")]);
        assert_eq!(svc.summary(&mut state).unwrap().engine_id, engine_id);
    }

    #[tokio::test]
    async fn test_reupload_of_same_batch_keeps_engine() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut state = SessionState::new(Uuid::new_v4());
        svc.upload(&mut state, &batch()).await.unwrap();
        svc.submit(&mut state, Some("hi"), |_| {}).await.unwrap();
        let before = svc.summary(&mut state).unwrap();

        svc.upload(&mut state, &batch()).await.unwrap();
        let after = svc.summary(&mut state).unwrap();
        assert_eq!(before.engine_id, after.engine_id);

        let other = UploadedFileSet::new(vec![UploadedFile::new("b.txt", "Rome is in Italy")]);
        svc.upload(&mut state, &other).await.unwrap();
        let replaced = svc.summary(&mut state).unwrap();
        assert_ne!(replaced.index.unwrap().id, before.index.unwrap().id);
        assert_eq!(replaced.engine_id, None);
    }

    #[tokio::test]
    async fn test_empty_upload_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut state = SessionState::new(Uuid::new_v4());
        assert!(svc
            .upload(&mut state, &UploadedFileSet::default())
            .await
            .unwrap()
            .is_none());
        assert!(svc.summary(&mut state).unwrap().index.is_none());
    }

    #[tokio::test]
    async fn test_uid_is_pinned_to_session() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut state = SessionState::new(Uuid::new_v4());
        let alice = UserIdentity::new("alice");
        svc.authenticate(&mut state, &alice).unwrap();
        svc.authenticate(&mut state, &alice).unwrap();
        assert!(matches!(
            svc.authenticate(&mut state, &UserIdentity::new("bob")),
            Err(RagChatError::AuthInvalid)
        ));
        assert_eq!(svc.summary(&mut state).unwrap().uid, Some(alice));
    }

    #[tokio::test]
    async fn test_sessions_share_cached_index() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MockLlm::echo());
        let mut a = SessionState::new(Uuid::new_v4());
        let mut b = SessionState::new(Uuid::new_v4());
        let ia = svc.upload(&mut a, &batch()).await.unwrap().unwrap();
        let ib = svc.upload(&mut b, &batch()).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&ia, &ib));
        assert_eq!(svc.index_builder().cached_len(), 1);
    }
}
