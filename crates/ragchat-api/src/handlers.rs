//! Route handler functions for all API endpoints.
//!
//! Session routes lock the session for the whole request, so each session
//! handles one operation at a time. Streaming chat keeps the lock inside the
//! task that produces the events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use ragchat_chat::{AssistantTurn, IndexSummary, SessionState, SessionSummary};
use ragchat_core::types::{ChatMessage, ChatMode, UploadedFile, UploadedFileSet, UserIdentity};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request and response types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub cached_indexes: usize,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: String,
}

#[derive(Debug, Serialize)]
pub struct ModeResponse {
    pub chat_mode: ChatMode,
    pub engine_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub files: usize,
    pub index: Option<IndexSummary>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// New user message. Omit to answer a message left pending.
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: Option<AssistantTurn>,
}

// =============================================================================
// Helpers
// =============================================================================

/// Lock a session and check the caller against its pinned identity.
async fn open_session(
    state: &AppState,
    id: Uuid,
    identity: &UserIdentity,
) -> Result<OwnedMutexGuard<SessionState>, ApiError> {
    let handle = state.sessions.get(id)?;
    let mut session = handle.lock_owned().await;
    state.service.authenticate(&mut session, identity)?;
    Ok(session)
}

fn json_event(name: &str, value: &impl Serialize) -> Event {
    let data = serde_json::to_string(value).unwrap_or_default();
    Event::default().event(name).data(data)
}

// =============================================================================
// Health
// =============================================================================

/// GET /health - liveness and basic counters.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_sessions: state.sessions.len(),
        cached_indexes: state.service.index_builder().cached_len(),
    })
}

// =============================================================================
// Sessions
// =============================================================================

/// POST /sessions - create a session pinned to the caller.
pub async fn create_session(
    State(state): State<AppState>,
    Extension(identity): Extension<UserIdentity>,
) -> Result<(StatusCode, Json<SessionSummary>), ApiError> {
    let (_, handle) = state.sessions.create()?;
    let mut session = handle.lock().await;
    state.service.authenticate(&mut session, &identity)?;
    let summary = state.service.summary(&mut session)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Extension(identity): Extension<UserIdentity>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, ApiError> {
    let mut session = open_session(&state, id, &identity).await?;
    Ok(Json(state.service.summary(&mut session)?))
}

/// DELETE /sessions/{id}
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(identity): Extension<UserIdentity>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    // Holding the lock waits out any turn still in flight.
    let session = open_session(&state, id, &identity).await?;
    state.sessions.remove(id)?;
    drop(session);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /sessions/{id}/files - multipart upload of one document batch.
pub async fn upload_files(
    State(state): State<AppState>,
    Extension(identity): Extension<UserIdentity>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            debug!(field = ?field.name(), "Skipping non-file multipart field");
            continue;
        };
        let content = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("reading {}: {}", name, e)))?;
        files.push(UploadedFile::new(name, content.to_vec()));
    }
    let files = UploadedFileSet::new(files);

    let mut session = open_session(&state, id, &identity).await?;
    let index = state.service.upload(&mut session, &files).await?;
    Ok(Json(UploadResponse {
        files: files.len(),
        index: index.as_deref().map(IndexSummary::of),
    }))
}

/// POST /sessions/{id}/mode - switch chat mode and rebuild the engine.
pub async fn set_mode(
    State(state): State<AppState>,
    Extension(identity): Extension<UserIdentity>,
    Path(id): Path<Uuid>,
    Json(body): Json<ModeRequest>,
) -> Result<Json<ModeResponse>, ApiError> {
    let mode: ChatMode = body.mode.parse()?;
    let mut session = open_session(&state, id, &identity).await?;
    let engine_id = state.service.change_mode(&mut session, mode)?;
    Ok(Json(ModeResponse {
        chat_mode: mode,
        engine_id,
    }))
}

/// POST /sessions/{id}/reset - clear the conversation.
pub async fn reset(
    State(state): State<AppState>,
    Extension(identity): Extension<UserIdentity>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let mut session = open_session(&state, id, &identity).await?;
    state.service.reset(&mut session)?;
    Ok(Json(MessagesResponse {
        messages: state.service.messages(&mut session),
    }))
}

/// GET /sessions/{id}/messages - the visible transcript.
pub async fn messages(
    State(state): State<AppState>,
    Extension(identity): Extension<UserIdentity>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let mut session = open_session(&state, id, &identity).await?;
    Ok(Json(MessagesResponse {
        messages: state.service.messages(&mut session),
    }))
}

// =============================================================================
// Chat
// =============================================================================

/// POST /sessions/{id}/chat - run one turn, streaming `partial` events with
/// the text so far, then one `done` or `error` event.
pub async fn chat_stream(
    State(state): State<AppState>,
    Extension(identity): Extension<UserIdentity>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = open_session(&state, id, &identity).await?;
    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    tokio::spawn(async move {
        let result = state
            .service
            .submit(&mut session, request.prompt.as_deref(), |text| {
                let _ = tx.send(json_event("partial", &serde_json::json!({ "text": text })));
            })
            .await;
        let event = match result {
            Ok(reply) => json_event("done", &ChatResponse { reply }),
            Err(e) => json_event("error", &ApiError::from(e).body()),
        };
        let _ = tx.send(event);
        info!(session_id = %id, "Chat stream finished");
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// POST /sessions/{id}/chat/sync - run one turn and return the reply.
pub async fn chat_sync(
    State(state): State<AppState>,
    Extension(identity): Extension<UserIdentity>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let mut session = open_session(&state, id, &identity).await?;
    let reply = state
        .service
        .submit(&mut session, request.prompt.as_deref(), |_| {})
        .await?;
    Ok(Json(ChatResponse { reply }))
}
