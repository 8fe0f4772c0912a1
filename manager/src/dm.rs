//! Outgoing HTTP channel to decision makers.
//!
//! Every request is preceded by a token lookup. Tokens are cached per
//! node; the cached entry is refreshed once the server-reported expiry,
//! minus a safety margin, has passed. Non-2xx responses surface as
//! errors without touching caller state.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use kinetic_common::{args::DmTlsArgs, intent::IntentSpec, pids::PodPidsResponse};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::topology::DmEndpoint;

const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Refresh tokens this many seconds before the server-reported expiry.
const TOKEN_SAFETY_MARGIN_SECS: i64 = 60;

#[async_trait]
pub trait DmApi: Send + Sync {
    async fn send_intents(&self, dm: &DmEndpoint, intents: &[IntentSpec]) -> Result<()>;

    async fn delete_intents(&self, dm: &DmEndpoint, pod_ids: &[String], all: bool) -> Result<()>;

    async fn merkle_root(&self, dm: &DmEndpoint) -> Result<String>;

    async fn pod_pids(&self, dm: &DmEndpoint) -> Result<PodPidsResponse>;
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// Unix seconds after which the token must be re-fetched.
    refresh_after: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    expired_at: i64,
}

pub struct HttpDmClient {
    client: reqwest::Client,
    scheme: &'static str,
    public_key: String,
    client_id: String,
    tokens: RwLock<HashMap<String, CachedToken>>,
}

impl HttpDmClient {
    pub fn new(public_key: String, client_id: String, tls: &DmTlsArgs) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(HTTP_TIMEOUT);
        let scheme = if tls.is_mutual() {
            let ca = std::fs::read(tls.dm_ca_cert_path.as_deref().unwrap())
                .context("failed to read decision maker CA cert")?;
            let cert = std::fs::read(tls.dm_client_cert_path.as_deref().unwrap())
                .context("failed to read client cert")?;
            let key = std::fs::read(tls.dm_client_key_path.as_deref().unwrap())
                .context("failed to read client key")?;

            let mut identity_pem = cert;
            identity_pem.extend_from_slice(&key);
            builder = builder
                .add_root_certificate(
                    reqwest::Certificate::from_pem(&ca).context("invalid CA cert")?,
                )
                .identity(
                    reqwest::Identity::from_pem(&identity_pem).context("invalid client identity")?,
                );
            "https"
        } else {
            "http"
        };

        Ok(Self {
            client: builder.build().context("failed to build http client")?,
            scheme,
            public_key,
            client_id,
            tokens: RwLock::new(HashMap::new()),
        })
    }

    fn base_url(&self, dm: &DmEndpoint) -> String {
        format!("{}://{}:{}", self.scheme, dm.host, dm.port)
    }

    async fn token(&self, dm: &DmEndpoint) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        {
            let tokens = self.tokens.read().await;
            if let Some(cached) = tokens.get(&dm.node_id)
                && now < cached.refresh_after
            {
                return Ok(cached.token.clone());
            }
        }

        let url = format!("{}/api/v1/auth/token", self.base_url(dm));
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "public_key": self.public_key,
                "client_id": self.client_id,
            }))
            .send()
            .await
            .context("failed to send token request")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("token exchange failed with status {}: {}", status, body);
        }
        let token: TokenResponse = resp.json().await.context("failed to parse token response")?;

        let refresh_after = token.expired_at - TOKEN_SAFETY_MARGIN_SECS;
        if refresh_after > now {
            self.tokens.write().await.insert(
                dm.node_id.clone(),
                CachedToken {
                    token: token.token.clone(),
                    refresh_after,
                },
            );
        }
        Ok(token.token)
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("{} failed with status {}: {}", what, status, body);
        }
        Ok(resp)
    }
}

#[async_trait]
impl DmApi for HttpDmClient {
    async fn send_intents(&self, dm: &DmEndpoint, intents: &[IntentSpec]) -> Result<()> {
        let token = self.token(dm).await?;
        let url = format!("{}/api/v1/intents", self.base_url(dm));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "intents": intents }))
            .send()
            .await
            .context("failed to send intents")?;
        Self::check(resp, "send intents").await?;
        Ok(())
    }

    async fn delete_intents(&self, dm: &DmEndpoint, pod_ids: &[String], all: bool) -> Result<()> {
        let token = self.token(dm).await?;
        let url = format!("{}/api/v1/intents", self.base_url(dm));
        let body = if all {
            serde_json::json!({ "all": true })
        } else {
            serde_json::json!({ "podIDs": pod_ids })
        };
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("failed to send intent deletion")?;
        Self::check(resp, "delete intents").await?;
        Ok(())
    }

    async fn merkle_root(&self, dm: &DmEndpoint) -> Result<String> {
        let token = self.token(dm).await?;
        let url = format!("{}/api/v1/intents/merkle", self.base_url(dm));
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("failed to request merkle root")?;
        let resp = Self::check(resp, "get merkle root").await?;

        #[derive(Deserialize)]
        struct RootResponse {
            #[serde(rename = "rootHash")]
            root_hash: String,
        }
        let root: RootResponse = resp
            .json()
            .await
            .context("failed to parse merkle root response")?;
        Ok(root.root_hash)
    }

    async fn pod_pids(&self, dm: &DmEndpoint) -> Result<PodPidsResponse> {
        let token = self.token(dm).await?;
        let url = format!("{}/api/v1/pods/pids", self.base_url(dm));
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("failed to request pod pids")?;
        let resp = Self::check(resp, "get pod pids").await?;
        resp.json()
            .await
            .context("failed to parse pod pids response")
    }
}
