//! Token issuance for manager → decision maker calls.
//!
//! The agent trusts exactly one client public key, provided at startup.
//! A caller presenting that key receives a short-lived bearer token
//! signed with the agent's own secret.

use kinetic_common::{auth, error::ApiError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub public_key: String,
    pub client_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    /// Unix seconds.
    pub expired_at: i64,
}

pub struct TokenIssuer {
    accepted_public_key: String,
    secret: Vec<u8>,
    ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(accepted_public_key: String, secret: &str, ttl_secs: i64) -> Self {
        Self {
            accepted_public_key,
            secret: secret.as_bytes().to_vec(),
            ttl_secs,
        }
    }

    pub fn exchange(&self, req: &TokenRequest) -> Result<TokenResponse, ApiError> {
        if req.client_id.is_empty() {
            return Err(ApiError::Validation("client_id is required".to_string()));
        }
        if req.public_key.trim() != self.accepted_public_key.trim() {
            return Err(ApiError::Auth("public key mismatch".to_string()));
        }
        let (token, expired_at) = auth::issue_token(&self.secret, &req.client_id, self.ttl_secs)
            .map_err(ApiError::Internal)?;
        metrics::counter!("dm_tokens_issued_total").increment(1);
        Ok(TokenResponse { token, expired_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new("pk-manager".to_string(), "dm-secret", 600)
    }

    #[test]
    fn matching_key_yields_verifiable_token() {
        let resp = issuer()
            .exchange(&TokenRequest {
                public_key: "pk-manager".to_string(),
                client_id: "manager".to_string(),
            })
            .unwrap();
        let claims = auth::verify_token(b"dm-secret", &resp.token).unwrap();
        assert_eq!(claims.sub, "manager");
        assert_eq!(claims.exp, resp.expired_at);
    }

    #[test]
    fn mismatched_key_is_unauthorized() {
        let err = issuer()
            .exchange(&TokenRequest {
                public_key: "pk-other".to_string(),
                client_id: "manager".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
    }

    #[test]
    fn empty_client_id_is_invalid() {
        let err = issuer()
            .exchange(&TokenRequest {
                public_key: "pk-manager".to_string(),
                client_id: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
