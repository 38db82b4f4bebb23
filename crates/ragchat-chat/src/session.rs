//! Per-session state with namespaced, typed attributes.
//!
//! A [`SessionState`] is a bag of attributes keyed `"{namespace}.{name}"`
//! plus named transcripts. Pages see it through a [`PageSessionState`]
//! view, which prefixes every key with the page namespace. Attributes are
//! declared once with a default and keep that type for the session's life.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use ragchat_core::error::{RagChatError, Result};
use ragchat_core::types::ChatMessage;

type AttrValue = Box<dyn Any + Send + Sync>;

// =============================================================================
// SessionState
// =============================================================================

/// State owned by one browser or API session.
pub struct SessionState {
    id: Uuid,
    attrs: HashMap<String, AttrValue>,
    transcripts: HashMap<String, Vec<ChatMessage>>,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.attrs.keys().collect();
        keys.sort();
        f.debug_struct("SessionState")
            .field("id", &self.id)
            .field("attrs", &keys)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl SessionState {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            attrs: HashMap::new(),
            transcripts: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Namespaced view for one page.
    pub fn page(&mut self, namespace: &str) -> PageSessionState<'_> {
        PageSessionState {
            namespace: namespace.to_string(),
            state: self,
        }
    }
}

// =============================================================================
// PageSessionState
// =============================================================================

/// A [`SessionState`] seen through one page namespace.
pub struct PageSessionState<'a> {
    namespace: String,
    state: &'a mut SessionState,
}

impl PageSessionState<'_> {
    fn key(&self, name: &str) -> String {
        format!("{}.{}", self.namespace, name)
    }

    pub fn session_id(&self) -> Uuid {
        self.state.id
    }

    /// Declare an attribute with its default.
    ///
    /// Returns `true` if the attribute was created by this call. An existing
    /// value is left untouched.
    pub fn initn_attr<T: Any + Send + Sync>(&mut self, name: &str, default: T) -> bool {
        let key = self.key(name);
        if self.state.attrs.contains_key(&key) {
            return false;
        }
        debug!(session_id = %self.state.id, key = %key, "Attribute initialized");
        self.state.attrs.insert(key, Box::new(default));
        true
    }

    pub fn is_init(&self, name: &str) -> bool {
        self.state.attrs.contains_key(&self.key(name))
    }

    pub fn get<T: Any>(&self, name: &str) -> Result<&T> {
        let key = self.key(name);
        self.state
            .attrs
            .get(&key)
            .ok_or_else(|| RagChatError::Session(format!("attribute '{}' read before init", key)))?
            .downcast_ref::<T>()
            .ok_or_else(|| RagChatError::Session(format!("attribute '{}' has another type", key)))
    }

    pub fn get_mut<T: Any>(&mut self, name: &str) -> Result<&mut T> {
        let key = self.key(name);
        self.state
            .attrs
            .get_mut(&key)
            .ok_or_else(|| RagChatError::Session(format!("attribute '{}' read before init", key)))?
            .downcast_mut::<T>()
            .ok_or_else(|| RagChatError::Session(format!("attribute '{}' has another type", key)))
    }

    /// Overwrite an initialized attribute. The value must keep its type.
    pub fn set<T: Any + Send + Sync>(&mut self, name: &str, value: T) -> Result<()> {
        *self.get_mut::<T>(name)? = value;
        Ok(())
    }

    pub fn add_chat_msg(&mut self, list: &str, message: ChatMessage) {
        let key = self.key(list);
        self.state.transcripts.entry(key).or_default().push(message);
    }

    pub fn chat_msgs(&self, list: &str) -> &[ChatMessage] {
        self.state
            .transcripts
            .get(&self.key(list))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn clear_chat_msgs(&mut self, list: &str) {
        if let Some(messages) = self.state.transcripts.get_mut(&self.key(list)) {
            messages.clear();
        }
    }
}

// =============================================================================
// SessionStore
// =============================================================================

/// Shared handle to one session. Holding the lock serializes its turns.
pub type SessionHandle = Arc<tokio::sync::Mutex<SessionState>>;

struct StoreEntry {
    handle: SessionHandle,
    last_access: DateTime<Utc>,
}

/// Live sessions keyed by id, dropped after a period of inactivity.
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, StoreEntry>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout_minutes: u32) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout: Duration::minutes(i64::from(idle_timeout_minutes)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, StoreEntry>>> {
        self.sessions
            .lock()
            .map_err(|e| RagChatError::Session(format!("session store lock poisoned: {}", e)))
    }

    fn is_idle(&self, entry: &StoreEntry, now: DateTime<Utc>) -> bool {
        now - entry.last_access > self.idle_timeout
    }

    pub fn create(&self) -> Result<(Uuid, SessionHandle)> {
        let id = Uuid::new_v4();
        let handle: SessionHandle = Arc::new(tokio::sync::Mutex::new(SessionState::new(id)));
        self.lock()?.insert(
            id,
            StoreEntry {
                handle: Arc::clone(&handle),
                last_access: Utc::now(),
            },
        );
        info!(session_id = %id, "Session created");
        Ok((id, handle))
    }

    /// Look up a session and refresh its idle clock.
    pub fn get(&self, id: Uuid) -> Result<SessionHandle> {
        let now = Utc::now();
        let mut sessions = self.lock()?;
        let idle = match sessions.get(&id) {
            Some(entry) => self.is_idle(entry, now),
            None => return Err(RagChatError::SessionNotFound(id)),
        };
        if idle {
            sessions.remove(&id);
            info!(session_id = %id, "Session expired");
            return Err(RagChatError::SessionNotFound(id));
        }
        let entry = sessions
            .get_mut(&id)
            .ok_or(RagChatError::SessionNotFound(id))?;
        entry.last_access = now;
        Ok(Arc::clone(&entry.handle))
    }

    pub fn remove(&self, id: Uuid) -> Result<()> {
        match self.lock()?.remove(&id) {
            Some(_) => {
                info!(session_id = %id, "Session removed");
                Ok(())
            }
            None => Err(RagChatError::SessionNotFound(id)),
        }
    }

    /// Drop every idle session. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_idle(entry, now));
        let purged = before - sessions.len();
        if purged > 0 {
            info!(purged, "Expired sessions purged");
        }
        Ok(purged)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initn_attr_only_sets_once() {
        let mut state = SessionState::new(Uuid::new_v4());
        let mut page = state.page("ragchat");
        assert!(page.initn_attr("count", 1u32));
        assert!(!page.initn_attr("count", 5u32));
        assert_eq!(*page.get::<u32>("count").unwrap(), 1);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let mut state = SessionState::new(Uuid::new_v4());
        state.page("a").initn_attr("mode", "plain".to_string());
        state.page("b").initn_attr("mode", "agentic".to_string());
        assert_eq!(state.page("a").get::<String>("mode").unwrap(), "plain");
        assert_eq!(state.page("b").get::<String>("mode").unwrap(), "agentic");
    }

    #[test]
    fn test_get_before_init_is_an_error() {
        let mut state = SessionState::new(Uuid::new_v4());
        let page = state.page("ragchat");
        assert!(matches!(
            page.get::<u32>("missing"),
            Err(RagChatError::Session(_))
        ));
    }

    #[test]
    fn test_set_keeps_declared_type() {
        let mut state = SessionState::new(Uuid::new_v4());
        let mut page = state.page("ragchat");
        page.initn_attr("uid", Option::<String>::None);
        page.set("uid", Some("u1".to_string())).unwrap();
        assert_eq!(
            page.get::<Option<String>>("uid").unwrap().as_deref(),
            Some("u1")
        );
        assert!(page.set("uid", 7u8).is_err());
        assert!(page.set("never_declared", 7u8).is_err());
    }

    #[test]
    fn test_chat_lists() {
        let mut state = SessionState::new(Uuid::new_v4());
        let mut page = state.page("ragchat");
        assert!(page.chat_msgs("messages").is_empty());
        page.add_chat_msg("messages", ChatMessage::user("hi"));
        page.add_chat_msg("messages", ChatMessage::assistant("hello"));
        assert_eq!(page.chat_msgs("messages").len(), 2);
        assert!(state.page("other").chat_msgs("messages").is_empty());

        let mut page = state.page("ragchat");
        page.clear_chat_msgs("messages");
        assert!(page.chat_msgs("messages").is_empty());
    }

    #[test]
    fn test_store_create_get_remove() {
        let store = SessionStore::new(60);
        let (id, _) = store.create().unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(id).is_ok());
        store.remove(id).unwrap();
        assert!(matches!(
            store.get(id),
            Err(RagChatError::SessionNotFound(_))
        ));
        assert!(store.remove(id).is_err());
    }

    #[test]
    fn test_store_expires_idle_sessions() {
        let store = SessionStore::new(0);
        let (id, _) = store.create().unwrap();
        {
            let mut sessions = store.sessions.lock().unwrap();
            sessions.get_mut(&id).unwrap().last_access = Utc::now() - Duration::seconds(5);
        }
        assert!(matches!(
            store.get(id),
            Err(RagChatError::SessionNotFound(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let store = SessionStore::new(1);
        let (stale, _) = store.create().unwrap();
        let (fresh, _) = store.create().unwrap();
        {
            let mut sessions = store.sessions.lock().unwrap();
            sessions.get_mut(&stale).unwrap().last_access = Utc::now() - Duration::minutes(2);
        }
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert!(store.get(fresh).is_ok());
    }

    #[tokio::test]
    async fn test_handle_shares_state() {
        let store = SessionStore::new(60);
        let (id, handle) = store.create().unwrap();
        handle.lock().await.page("p").initn_attr("n", 3i32);
        let again = store.get(id).unwrap();
        let mut state = again.lock().await;
        assert_eq!(*state.page("p").get::<i32>("n").unwrap(), 3);
    }
}
