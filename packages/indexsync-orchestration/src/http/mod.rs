//! HTTP adapters of the content service
//!
//! Every call carries the repository's bearer token from the
//! [`AuthTokenBroker`]. A 401 drops the token and the call is repeated once
//! with a freshly registered one.

mod content;
mod feed;

pub use content::{HttpContentSource, ObjectPage};
pub use feed::{FeedPage, HttpChangeFeed, LatestSequence};

use indexsync_core::config::{ContentServiceConfig, RepositoryCredentials};
use indexsync_storage::{ErrorKind, StorageError};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::AuthTokenBroker;
use crate::error::{OrchestratorError, Result};

/// Authenticated JSON client shared by the content and feed adapters.
pub struct ContentServiceClient {
    client: reqwest::Client,
    base_url: Url,
    broker: Arc<AuthTokenBroker>,
    credentials: HashMap<String, RepositoryCredentials>,
}

impl ContentServiceClient {
    pub fn new(
        config: &ContentServiceConfig,
        credentials: &[RepositoryCredentials],
        broker: Arc<AuthTokenBroker>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(OrchestratorError::transport)?;
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            OrchestratorError::Config(indexsync_core::ConfigError::invalid(
                "content_service.base_url",
                e.to_string(),
            ))
        })?;
        Ok(Self {
            client,
            base_url,
            broker,
            credentials: credentials
                .iter()
                .map(|c| (c.id.clone(), c.clone()))
                .collect(),
        })
    }

    fn url(&self, repository_id: &str, segments: &[&str], query: &[(&str, String)]) -> std::result::Result<Url, StorageError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::new(ErrorKind::Config, "base url cannot be a base"))?
            .pop_if_empty()
            .push("repo")
            .push(repository_id)
            .extend(segments);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// GET a JSON resource below `{base}/repo/{repository}/`.
    ///
    /// `Ok(None)` on 404.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        repository_id: &str,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> std::result::Result<Option<T>, StorageError> {
        let credentials = self
            .credentials
            .get(repository_id)
            .ok_or_else(|| StorageError::repository_not_found(repository_id))?;
        let url = self.url(repository_id, segments, query)?;

        let mut refreshed = false;
        loop {
            let token = self
                .broker
                .token_for(credentials)
                .await
                .map_err(auth_error)?;
            debug!(repository_id, url = %url, "GET");
            let response = self
                .client
                .get(url.clone())
                .bearer_auth(&token.token)
                .send()
                .await
                .map_err(|e| StorageError::transport(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed {
                warn!(repository_id, "Token refused, registering a new one");
                self.broker.invalidate(repository_id).await;
                refreshed = true;
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(StorageError::unauthorized(format!("{} returned {}", url, status)));
            }
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(StorageError::transport(format!("{} returned {}", url, status)));
            }
            if !status.is_success() {
                return Err(StorageError::rejected(format!("{} returned {}", url, status)));
            }

            let body = response
                .json::<T>()
                .await
                .map_err(|e| StorageError::serialization(format!("{}: {}", url, e)))?;
            return Ok(Some(body));
        }
    }
}

fn auth_error(err: OrchestratorError) -> StorageError {
    if err.is_transient() {
        StorageError::transport(err.to_string())
    } else {
        StorageError::unauthorized(err.to_string())
    }
}
