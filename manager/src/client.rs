//! Client for the manager's HTTP API, used by the operator CLI.

use anyhow::{Context, Result, bail};
use kinetic_common::pids::PodPidsResponse;
use reqwest::Client;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{
    CreateStrategyRequest, DeleteIntentsRequest, DeleteStrategyRequest, Intent, LoginRequest,
    LoginResponse, Strategy, StrategyWithIntents,
};

#[derive(Clone)]
pub struct ManagerClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ManagerClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Check if the service is healthy.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to send health request")?;

        if resp.status().is_success() {
            Ok(())
        } else {
            bail!("health check failed with status: {}", resp.status())
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let url = format!("{}/api/v1/auth/login", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .context("failed to send login request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("login failed with status {}: {}", status, body);
        }

        let login: LoginResponse = resp.json().await.context("failed to parse login response")?;
        Ok(login.token)
    }

    pub async fn create_strategy(
        &self,
        req: &CreateStrategyRequest,
    ) -> Result<StrategyWithIntents> {
        let url = format!("{}/api/v1/strategies", self.base_url);
        let resp = self
            .with_auth(self.client.post(&url))
            .json(req)
            .send()
            .await
            .context("failed to send create strategy request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("create strategy failed with status {}: {}", status, body);
        }

        resp.json()
            .await
            .context("failed to parse create strategy response")
    }

    pub async fn list_strategies(&self) -> Result<Vec<Strategy>> {
        #[derive(Deserialize)]
        struct Body {
            strategies: Vec<Strategy>,
        }

        let url = format!("{}/api/v1/strategies/self", self.base_url);
        let resp = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .context("failed to send list strategies request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("list strategies failed with status {}: {}", status, body);
        }

        let body: Body = resp
            .json()
            .await
            .context("failed to parse list strategies response")?;
        Ok(body.strategies)
    }

    pub async fn delete_strategy(&self, strategy_id: Uuid) -> Result<()> {
        let url = format!("{}/api/v1/strategies", self.base_url);
        let resp = self
            .with_auth(self.client.delete(&url))
            .json(&DeleteStrategyRequest { strategy_id })
            .send()
            .await
            .context("failed to send delete strategy request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("delete strategy failed with status {}: {}", status, body);
        }
        Ok(())
    }

    pub async fn list_intents(&self) -> Result<Vec<Intent>> {
        #[derive(Deserialize)]
        struct Body {
            intents: Vec<Intent>,
        }

        let url = format!("{}/api/v1/intents/self", self.base_url);
        let resp = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .context("failed to send list intents request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("list intents failed with status {}: {}", status, body);
        }

        let body: Body = resp
            .json()
            .await
            .context("failed to parse list intents response")?;
        Ok(body.intents)
    }

    pub async fn delete_intents(&self, intent_ids: Vec<Uuid>) -> Result<()> {
        let url = format!("{}/api/v1/intents", self.base_url);
        let resp = self
            .with_auth(self.client.delete(&url))
            .json(&DeleteIntentsRequest { intent_ids })
            .send()
            .await
            .context("failed to send delete intents request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("delete intents failed with status {}: {}", status, body);
        }
        Ok(())
    }

    pub async fn nodes(&self) -> Result<serde_json::Value> {
        let url = format!("{}/api/v1/nodes", self.base_url);
        let resp = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .context("failed to send nodes request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("nodes request failed with status {}: {}", status, body);
        }

        resp.json().await.context("failed to parse nodes response")
    }

    pub async fn node_pod_pids(&self, node_id: &str) -> Result<PodPidsResponse> {
        let url = format!("{}/api/v1/nodes/{}/pods/pids", self.base_url, node_id);
        let resp = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .context("failed to send pod pids request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("pod pids request failed with status {}: {}", status, body);
        }

        resp.json().await.context("failed to parse pod pids response")
    }
}
