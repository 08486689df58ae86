use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexsync_core::config::ContentServiceConfig;
use indexsync_storage::AuthToken;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use crate::retry::RetryPolicy;

/// Obtains a fresh token for (repository, user).
#[async_trait]
pub trait TokenRegistrar: Send + Sync {
    async fn register(
        &self,
        repository_id: &str,
        username: &str,
        password: &str,
    ) -> Result<AuthToken>;
}

/// Body of the registration endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub status: String,
    #[serde(default)]
    pub value: Option<TokenValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenValue {
    pub token: String,
    /// Epoch milliseconds
    pub expiration: i64,
}

/// `GET {base}/repo/{repository}/authtoken/{user}/register?app=<app>` with
/// Basic auth.
pub struct HttpTokenRegistrar {
    client: reqwest::Client,
    base_url: Url,
    app: String,
    retry: RetryPolicy,
}

impl HttpTokenRegistrar {
    pub fn new(config: &ContentServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(OrchestratorError::transport)?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: reqwest::Client, config: &ContentServiceConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            OrchestratorError::Config(indexsync_core::ConfigError::invalid(
                "content_service.base_url",
                e.to_string(),
            ))
        })?;
        Ok(Self {
            client,
            base_url,
            app: config.app.clone(),
            retry: RetryPolicy::from_config(&config.retry),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn registration_url(&self, repository_id: &str, username: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| OrchestratorError::parse("content_service.base_url cannot be a base"))?
            .pop_if_empty()
            .extend(["repo", repository_id, "authtoken", username, "register"]);
        url.query_pairs_mut().append_pair("app", &self.app);
        Ok(url)
    }

    async fn register_once(
        &self,
        url: &Url,
        repository_id: &str,
        username: &str,
        password: &str,
    ) -> Result<AuthToken> {
        let registration_error = |reason: String| OrchestratorError::Registration {
            repository_id: repository_id.to_string(),
            username: username.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url.clone())
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(OrchestratorError::transport)?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(OrchestratorError::Transport(format!(
                "token registration returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(registration_error(format!("HTTP {}", status)));
        }

        let body: RegistrationResponse = response
            .json()
            .await
            .map_err(|e| registration_error(format!("invalid response body: {}", e)))?;
        if body.status != "success" {
            return Err(registration_error(format!("status '{}'", body.status)));
        }
        let value = body
            .value
            .ok_or_else(|| registration_error("response carries no token".to_string()))?;
        let expires_at: DateTime<Utc> = DateTime::from_timestamp_millis(value.expiration)
            .ok_or_else(|| registration_error(format!("bad expiration {}", value.expiration)))?;

        Ok(AuthToken {
            repository_id: repository_id.to_string(),
            username: username.to_string(),
            token: value.token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenRegistrar for HttpTokenRegistrar {
    async fn register(
        &self,
        repository_id: &str,
        username: &str,
        password: &str,
    ) -> Result<AuthToken> {
        let url = self.registration_url(repository_id, username)?;
        debug!(repository_id, username, url = %url, "Registering token");
        let token = self
            .retry
            .run(
                "token registration",
                || self.register_once(&url, repository_id, username, password),
                OrchestratorError::is_transient,
            )
            .await?;
        info!(repository_id, username, expires_at = %token.expires_at, "Registered token");
        Ok(token)
    }
}
