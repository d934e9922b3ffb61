//! Pass-through bearer token admission
//!
//! The server never verifies tokens. [`TrustBoundary`] decodes the claim
//! payload of a JWT-shaped bearer token so the transport knows the subject,
//! scopes, and expiry, and then forwards the raw token to Microsoft Graph,
//! which is the only party that checks signatures. A forged but well-formed
//! token is admitted here and rejected on first upstream use.

use std::collections::BTreeSet;

use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde_json::{Map, Value, json};
use tracing::Instrument;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

/// Client identifier reported when the token names none
const DEFAULT_SUBJECT: &str = "microsoft-graph";

/// Claims derived from an unverified bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Application/client identifier (`appid`, `client_id`, or `azp`)
    pub subject: String,
    /// Delegated or application scopes
    pub scopes: BTreeSet<String>,
    /// Expiry instant from the `exp` claim
    pub expires_at: DateTime<Utc>,
}

/// Bearer credential for a single request
///
/// Holds the raw token as a secret so it never shows up in `Debug` output or
/// logs. Lives in the request extensions and is dropped with the request.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Raw bearer token forwarded to the provider
    pub token: SecretString,
    /// Claims decoded at admission time
    pub claims: Claims,
}

/// Claim decoder that explicitly does NOT authenticate
///
/// `decode` only guarantees that the token is structurally a JWT with a JSON
/// claim payload and an `exp` claim. It does not check the signature, issuer,
/// audience, or revocation status; those are delegated to the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustBoundary;

impl TrustBoundary {
    /// Decode claims from a three-segment bearer token
    ///
    /// # Errors
    ///
    /// - `MalformedCredential` if the token is not three segments with a
    ///   non-empty header and payload (the signature may be empty), the payload
    ///   is not base64url, or it does not decode to a JSON object
    /// - `MissingExpiry` if no numeric `exp` claim is present
    pub fn decode(&self, token: &str) -> AppResult<Claims> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 || segments[..2].iter().any(|s| s.is_empty()) {
            return Err(AppError::MalformedCredential(
                "expected three dot-separated segments".to_owned(),
            ));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1])
            .or_else(|_| URL_SAFE.decode(segments[1]))
            .map_err(|_| AppError::MalformedCredential("payload is not base64url".to_owned()))?;
        let claims: Map<String, Value> = serde_json::from_slice(&payload).map_err(|_| {
            AppError::MalformedCredential("payload is not a JSON object".to_owned())
        })?;

        let exp = claims
            .get("exp")
            .and_then(Value::as_f64)
            .ok_or(AppError::MissingExpiry)?;
        let expires_at = DateTime::<Utc>::from_timestamp(exp as i64, 0)
            .ok_or_else(|| AppError::MalformedCredential("exp claim out of range".to_owned()))?;

        Ok(Claims {
            subject: subject_claim(&claims),
            scopes: scope_claim(&claims),
            expires_at,
        })
    }
}

/// Pick the client identifier, falling back to a fixed subject
fn subject_claim(claims: &Map<String, Value>) -> String {
    ["appid", "client_id", "azp"]
        .iter()
        .find_map(|key| claims.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT)
        .to_owned()
}

/// Split `scp`, else `scope`, on whitespace
fn scope_claim(claims: &Map<String, Value>) -> BTreeSet<String> {
    claims
        .get("scp")
        .and_then(Value::as_str)
        .or_else(|| claims.get("scope").and_then(Value::as_str))
        .map(|s| s.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Extract the token from an `Authorization: Bearer` header value
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Admit requests carrying a decodable, unexpired bearer token
///
/// On success the [`Credential`] is placed in the request extensions and the
/// rest of the stack runs inside a span tagged with a fresh request id.
/// Anything else is answered with `401` before a session is created, so no
/// provider call can happen for a rejected request.
pub async fn require_bearer(mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_owned);

    let Some(token) = token else {
        return unauthorized("missing bearer token");
    };

    let claims = match TrustBoundary.decode(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "bearer token rejected at admission");
            return unauthorized(&e.to_string());
        }
    };
    if claims.expires_at <= Utc::now() {
        return unauthorized("token has expired");
    }

    let request_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "mcp_request",
        %request_id,
        subject = %claims.subject,
        scopes = claims.scopes.len()
    );
    request.extensions_mut().insert(Credential {
        token: SecretString::from(token),
        claims,
    });
    next.run(request).instrument(span).await
}

/// Build an RFC 6750 style `401` response
fn unauthorized(description: &str) -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({
            "error": "invalid_token",
            "error_description": description,
        })),
    )
        .into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Bearer error=\"invalid_token\""),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::{AppError, TrustBoundary, bearer_token};
    use crate::testing::jwt;
    use serde_json::json;

    #[test]
    fn decodes_scp_scopes_and_expiry() {
        let token = jwt(&json!({ "exp": 4_102_444_800_u64, "scp": "Mail.Read Files.ReadWrite", "appid": "app-1" }));
        let claims = TrustBoundary.decode(&token).expect("token decodes");
        assert_eq!(claims.subject, "app-1");
        assert!(claims.scopes.contains("Mail.Read"));
        assert!(claims.scopes.contains("Files.ReadWrite"));
        assert_eq!(claims.expires_at.timestamp(), 4_102_444_800);
    }

    #[test]
    fn falls_back_to_scope_claim_then_empty() {
        let token = jwt(&json!({ "exp": 4_102_444_800_u64, "scope": "User.Read" }));
        let claims = TrustBoundary.decode(&token).expect("token decodes");
        assert_eq!(claims.scopes.len(), 1);
        assert_eq!(claims.subject, "microsoft-graph");

        let token = jwt(&json!({ "exp": 4_102_444_800_u64 }));
        let claims = TrustBoundary.decode(&token).expect("token decodes");
        assert!(claims.scopes.is_empty());
    }

    #[test]
    fn missing_exp_is_rejected() {
        let token = jwt(&json!({ "scp": "Mail.Read" }));
        assert!(matches!(
            TrustBoundary.decode(&token),
            Err(AppError::MissingExpiry)
        ));
    }

    #[test]
    fn unsigned_token_is_admitted() {
        let signed = jwt(&json!({ "exp": 4_102_444_800_u64, "scp": "Mail.Read" }));
        let unsigned = signed.trim_end_matches("sig");
        assert!(unsigned.ends_with('.'));
        let claims = TrustBoundary.decode(unsigned).expect("empty signature accepted");
        assert!(claims.scopes.contains("Mail.Read"));
    }

    #[test]
    fn non_object_payload_is_malformed() {
        for token in [
            "abc",
            "a.b",
            "a.!!!.c",
            ".e30.sig",
            "eyJhbGciOiJub25lIn0..sig",
            "eyJhbGciOiJub25lIn0.WzEsMl0.sig",
        ] {
            assert!(
                matches!(
                    TrustBoundary.decode(token),
                    Err(AppError::MalformedCredential(_))
                ),
                "{token} should be malformed"
            );
        }
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
