//! Per-user fixed-window rate limiter middleware.
//!
//! Each authenticated user gets `max_per_sec` requests per one-second
//! window. Requests without an identity share one anonymous bucket. Must
//! run inside the auth middleware so the identity extension is present.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Extension, Request};
use axum::middleware::Next;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use ragchat_core::types::UserIdentity;

const ANONYMOUS: &str = "";

#[derive(Clone, Copy)]
struct Window {
    second: u64,
    count: u64,
}

/// Shared state for the rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    max_per_sec: u64,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl RateLimiter {
    pub fn new(max_per_sec: u64) -> Self {
        Self {
            max_per_sec,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request for `key` at epoch second `now`.
    fn try_acquire_at(&self, key: &str, now: u64) -> bool {
        let Ok(mut windows) = self.windows.lock() else {
            return true;
        };
        // Bound the map: forget users idle since an earlier second.
        if windows.len() > 1024 {
            windows.retain(|_, w| w.second == now);
        }
        let window = windows.entry(key.to_string()).or_insert(Window {
            second: now,
            count: 0,
        });
        if window.second != now {
            *window = Window {
                second: now,
                count: 0,
            };
        }
        window.count += 1;
        window.count <= self.max_per_sec
    }

    fn try_acquire(&self, key: &str) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.try_acquire_at(key, now)
    }
}

/// Axum middleware that enforces the per-user limit.
pub async fn rate_limit_middleware(
    Extension(limiter): Extension<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .extensions()
        .get::<UserIdentity>()
        .map(|id| id.as_str().to_string())
        .unwrap_or_else(|| ANONYMOUS.to_string());
    if limiter.try_acquire(&key) {
        next.run(req).await
    } else {
        warn!(uid = %key, "Rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "too_many_requests",
                "message": "Rate limit exceeded"
            })),
        )
            .into_response()
    }
}
