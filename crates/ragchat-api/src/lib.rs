//! RAG Chat API crate - axum HTTP server, route handlers, SSE streaming.
//!
//! Exposes sessions, uploads, chat-mode changes, resets, and streamed chat
//! turns over HTTP. Every session route requires a signed credential.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use auth::AuthGate;
pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
