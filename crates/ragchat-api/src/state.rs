//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use ragchat_chat::{Capabilities, RagChatService, SessionStore};
use ragchat_core::config::RagChatConfig;

use crate::auth::AuthGate;

/// Shared application state.
///
/// All fields are cheap to clone; sessions carry their own locks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RagChatConfig>,
    pub service: Arc<RagChatService>,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<AuthGate>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: RagChatConfig, capabilities: Capabilities) -> Self {
        let service = RagChatService::new(&config, capabilities);
        Self::with_service(config, service)
    }

    pub fn with_service(config: RagChatConfig, service: RagChatService) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new(config.session.idle_timeout_minutes)),
            auth: Arc::new(AuthGate::new(&config.auth.secret)),
            service: Arc::new(service),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }
}
