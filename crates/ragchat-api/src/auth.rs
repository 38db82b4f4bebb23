//! Credential validation and the auth middleware.
//!
//! Credentials are compact HS256 JSON Web Tokens signed with the
//! deployment secret. The token's `uid` claim becomes the caller's
//! [`UserIdentity`]. A credential is read from the `apikey` query parameter
//! first, then from `Authorization: Bearer <token>`.

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;

use ragchat_core::types::UserIdentity;

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Validates credentials against the process-wide secret.
pub struct AuthGate {
    secret: Vec<u8>,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .ok()
}

fn decode_json(segment: &str) -> Option<Value> {
    serde_json::from_slice(&decode_segment(segment)?).ok()
}

impl AuthGate {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Option<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).ok()
    }

    /// Identity carried by a valid credential, or `None`.
    ///
    /// Rejects anything that is not a three-part HS256 token with a good
    /// signature, an unexpired `exp` and a reached `nbf` (when present), and
    /// a non-empty string or non-zero numeric `uid`.
    pub fn validate(&self, credential: Option<&str>) -> Option<UserIdentity> {
        let token = credential.map(str::trim).filter(|t| !t.is_empty())?;
        let mut parts = token.split('.');
        let (header_b64, payload_b64, signature_b64) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let header = decode_json(header_b64)?;
        if header.get("alg").and_then(Value::as_str) != Some("HS256") {
            debug!("credential rejected: unsupported algorithm");
            return None;
        }

        let signature = decode_segment(signature_b64)?;
        let mut mac = self.mac()?;
        mac.update(format!("{}.{}", header_b64, payload_b64).as_bytes());
        if mac.verify_slice(&signature).is_err() {
            debug!("credential rejected: bad signature");
            return None;
        }

        let claims = decode_json(payload_b64)?;
        let now = chrono::Utc::now().timestamp() as f64;
        if let Some(exp) = claims.get("exp") {
            if exp.as_f64()? <= now {
                debug!("credential rejected: expired");
                return None;
            }
        }
        if let Some(nbf) = claims.get("nbf") {
            if nbf.as_f64()? > now {
                debug!("credential rejected: not yet valid");
                return None;
            }
        }

        let uid = uid_claim(claims.get("uid")?)?;
        Some(UserIdentity::new(uid))
    }

    /// Sign `claims` as an HS256 token.
    pub fn sign(&self, claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let signing_input = format!("{}.{}", header, payload);
        let signature = match self.mac() {
            Some(mut mac) => {
                mac.update(signing_input.as_bytes());
                URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
            }
            None => String::new(),
        };
        format!("{}.{}", signing_input, signature)
    }
}

/// The `uid` claim as an identity string. Empty strings and zero are not
/// identities; whitespace is kept as sent.
fn uid_claim(uid: &Value) -> Option<String> {
    match uid {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct CredentialQuery {
    apikey: Option<String>,
}

/// Credential from the `apikey` query parameter or the bearer header.
pub fn credential_from(query: Option<&str>, headers: &HeaderMap) -> Option<String> {
    let from_query = query
        .and_then(|q| format!("/?{}", q).parse::<Uri>().ok())
        .and_then(|uri| Query::<CredentialQuery>::try_from_uri(&uri).ok())
        .and_then(|Query(q)| q.apikey)
        .filter(|k| !k.trim().is_empty());
    if from_query.is_some() {
        return from_query;
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Middleware that validates the request credential and stores the
/// caller's [`UserIdentity`] as a request extension.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let credential = credential_from(req.uri().query(), req.headers());
    match state.auth.validate(credential.as_deref()) {
        Some(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        None => ApiError::Unauthorized("Auth is invalid".to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde_json::json;

    use super::*;

    fn gate() -> AuthGate {
        AuthGate::new("test-secret")
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_valid_token_yields_uid() {
        let token = gate().sign(&json!({"uid": "alice", "exp": future_exp()}));
        assert_eq!(
            gate().validate(Some(&token)),
            Some(UserIdentity::new("alice"))
        );
    }

    #[test]
    fn test_numeric_uid_and_missing_exp() {
        let token = gate().sign(&json!({"uid": 42}));
        assert_eq!(gate().validate(Some(&token)), Some(UserIdentity::new("42")));
    }

    #[test]
    fn test_rejections_collapse_to_none() {
        let gate = gate();
        assert_eq!(gate.validate(None), None);
        assert_eq!(gate.validate(Some("")), None);
        assert_eq!(gate.validate(Some("not-a-token")), None);
        assert_eq!(gate.validate(Some("a.b.c.d")), None);

        let expired = gate.sign(&json!({"uid": "alice", "exp": 1}));
        assert_eq!(gate.validate(Some(&expired)), None);

        let no_uid = gate.sign(&json!({"sub": "alice"}));
        assert_eq!(gate.validate(Some(&no_uid)), None);

        let empty_uid = gate.sign(&json!({"uid": ""}));
        assert_eq!(gate.validate(Some(&empty_uid)), None);

        let foreign = AuthGate::new("other-secret").sign(&json!({"uid": "alice"}));
        assert_eq!(gate.validate(Some(&foreign)), None);
    }

    #[test]
    fn test_uid_truthiness() {
        let gate = gate();
        let zero = gate.sign(&json!({"uid": 0}));
        assert_eq!(gate.validate(Some(&zero)), None);
        let flag = gate.sign(&json!({"uid": true}));
        assert_eq!(gate.validate(Some(&flag)), None);
        let blank = gate.sign(&json!({"uid": "  "}));
        assert_eq!(gate.validate(Some(&blank)), Some(UserIdentity::new("  ")));
    }

    #[test]
    fn test_not_before_is_enforced() {
        let gate = gate();
        let early = gate.sign(&json!({"uid": "alice", "nbf": future_exp()}));
        assert_eq!(gate.validate(Some(&early)), None);
        let started = gate.sign(&json!({"uid": "alice", "nbf": 1}));
        assert_eq!(gate.validate(Some(&started)), Some(UserIdentity::new("alice")));
        let garbled = gate.sign(&json!({"uid": "alice", "nbf": "soon"}));
        assert_eq!(gate.validate(Some(&garbled)), None);
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let gate = gate();
        let token = gate.sign(&json!({"uid": "alice"}));
        let parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(json!({"uid": "mallory"}).to_string());
        let tampered = format!("{}.{}.{}", parts[0], forged, parts[2]);
        assert_eq!(gate.validate(Some(&tampered)), None);
    }

    #[test]
    fn test_other_algorithms_are_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(json!({"uid": "alice"}).to_string());
        let token = format!("{}.{}.", header, payload);
        assert_eq!(gate().validate(Some(&token)), None);
    }

    #[test]
    fn test_query_credential_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(
            credential_from(Some("apikey=from-query&x=1"), &headers).as_deref(),
            Some("from-query")
        );
        assert_eq!(
            credential_from(Some("x=1"), &headers).as_deref(),
            Some("from-header")
        );
        assert_eq!(credential_from(None, &HeaderMap::new()), None);
    }
}
