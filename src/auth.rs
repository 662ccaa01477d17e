//! Bearer token authentication for the HTTP transport.
//!
//! Every route except `/health` requires `Authorization: Bearer <jwt>`. The
//! token is an HS256 JWT signed with the configured secret and must carry an
//! `exp` claim. Event-stream clients that cannot set headers may pass the
//! token as a `?token=` query parameter instead.
//!
//! Failures are deliberately indistinguishable on the wire: missing,
//! malformed, badly signed and expired tokens all get the same 401 with a
//! JSON-RPC `Unauthorized` envelope.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::RpcError;
use crate::protocol::ResponseEnvelope;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no bearer token supplied")]
    Missing,
    #[error("token rejected: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("system clock is before the UNIX epoch")]
    Clock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
}

/// The authenticated caller, attached to the request's extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
}

pub struct AuthGuard {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
    token_ttl_secs: u64,
}

impl AuthGuard {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            token_ttl_secs: config.token_ttl_minutes.saturating_mul(60),
        }
    }

    /// Verify signature and expiry.
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(Principal {
            subject: data.claims.sub,
        })
    }

    /// Extract the token from the header (or `token` query parameter) and verify it.
    pub fn authorize(
        &self,
        headers: &HeaderMap,
        query: Option<&str>,
    ) -> Result<Principal, AuthError> {
        let from_header = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim);
        let from_query = query.and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("token="))
        });
        let token = from_header
            .or(from_query)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Missing)?;
        self.verify(token)
    }

    /// Mint a token for `subject` valid for the configured TTL.
    pub fn issue_token(&self, subject: &str) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| AuthError::Clock)?
            .as_secs();
        let claims = Claims {
            sub: subject.to_string(),
            exp: now + self.token_ttl_secs,
            iat: Some(now),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }
}

/// Axum middleware guarding every authenticated route. Runs before the
/// dispatcher; a rejected request never reaches a tool handler.
pub async fn require_bearer(
    State(guard): State<Arc<AuthGuard>>,
    mut request: Request,
    next: Next,
) -> Response {
    match guard.authorize(request.headers(), request.uri().query()) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => {
            debug!(path = %request.uri().path(), error = %e, "rejected request");
            unauthorized()
        }
    }
}

/// Uniform 401 carrying a JSON-RPC error envelope.
pub fn unauthorized() -> Response {
    let body = ResponseEnvelope::failure(Value::Null, RpcError::unauthorized());
    let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(secret: &str) -> AuthGuard {
        AuthGuard::new(&AuthConfig {
            jwt_secret: secret.into(),
            token_ttl_minutes: 5,
        })
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        h
    }

    #[test]
    fn issued_token_round_trips() {
        let g = guard("secret");
        let token = g.issue_token("agent-1").unwrap();
        let p = g.authorize(&bearer(&token), None).unwrap();
        assert_eq!(p.subject, "agent-1");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = guard("one").issue_token("x").unwrap();
        assert!(matches!(
            guard("two").authorize(&bearer(&token), None),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = Claims {
            sub: "x".into(),
            exp: 1_000,
            iat: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(guard("secret").verify(&token).is_err());
    }

    #[test]
    fn token_without_exp_is_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({"sub": "x"}),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(guard("secret").verify(&token).is_err());
    }

    #[test]
    fn missing_or_non_bearer_header() {
        let g = guard("secret");
        assert!(matches!(g.authorize(&HeaderMap::new(), None), Err(AuthError::Missing)));

        let mut basic = HeaderMap::new();
        basic.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert!(matches!(g.authorize(&basic, None), Err(AuthError::Missing)));
    }

    #[test]
    fn query_token_is_accepted() {
        let g = guard("secret");
        let token = g.issue_token("sse").unwrap();
        let query = format!("session=1&token={token}");
        assert_eq!(g.authorize(&HeaderMap::new(), Some(&query)).unwrap().subject, "sse");
    }
}
