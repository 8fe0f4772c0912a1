//! Bearer-token auth shared by both services.
//!
//! Tokens are HS256 JWTs. The manager mints them at login; each decision
//! maker mints its own after a successful public-key exchange. Handlers
//! receive the verified subject through the [`AuthSubject`] extractor.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Extension, RequestPartsExt,
    extract::FromRequestParts,
    http::request::Parts,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signing/verification secret, injected into routers as an `Extension`.
#[derive(Clone)]
pub struct AuthSecret(pub Arc<Vec<u8>>);

impl AuthSecret {
    pub fn new(secret: &str) -> Self {
        Self(Arc::new(secret.as_bytes().to_vec()))
    }
}

/// Issue a token for `subject`, returning the token and its unix expiry.
pub fn issue_token(secret: &[u8], subject: &str, ttl_secs: i64) -> Result<(String, i64)> {
    let now = chrono::Utc::now().timestamp();
    let exp = now + ttl_secs;
    let claims = Claims {
        sub: subject.to_string(),
        iat: now,
        exp,
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .context("failed to sign token")?;
    Ok((token, exp))
}

/// Verify a token's signature and expiry, returning its claims.
pub fn verify_token(secret: &[u8], token: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS256),
    )
    .context("token rejected")?;
    Ok(data.claims)
}

/// The authenticated caller, extracted from `Authorization: Bearer <JWT>`.
pub struct AuthSubject(pub String);

impl<S> FromRequestParts<S> for AuthSubject
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Extension(secret) = parts
            .extract::<Extension<AuthSecret>>()
            .await
            .map_err(|_| ApiError::Auth("auth not configured".to_string()))?;

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Auth("missing Authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Auth("expected Bearer token".to_string()))?;

        let claims = verify_token(&secret.0, token)
            .map_err(|e| ApiError::Auth(format!("invalid token: {}", e)))?;
        Ok(AuthSubject(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify_with_same_secret() {
        let (token, exp) = issue_token(b"secret", "operator", 3600).unwrap();
        let claims = verify_token(b"secret", &token).unwrap();
        assert_eq!(claims.sub, "operator");
        assert_eq!(claims.exp, exp);
        assert!(exp > chrono::Utc::now().timestamp());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (token, _) = issue_token(b"secret", "operator", 3600).unwrap();
        assert!(verify_token(b"other", &token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let (token, _) = issue_token(b"secret", "operator", -120).unwrap();
        assert!(verify_token(b"secret", &token).is_err());
    }
}
