use chrono::Utc;
use dashmap::DashMap;
use indexsync_core::config::RepositoryCredentials;
use indexsync_storage::AuthToken;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::registrar::TokenRegistrar;
use crate::error::Result;

type TokenSlot = Arc<Mutex<Option<AuthToken>>>;

/// Token cache keyed by repository, single-flight per repository.
///
/// Concurrent callers for the same repository queue on one async mutex, so
/// at most one registration is in flight and the others reuse its result.
/// A failed registration leaves the slot empty and is returned to the caller.
pub struct AuthTokenBroker {
    registrar: Arc<dyn TokenRegistrar>,
    tokens: DashMap<String, TokenSlot>,
    refresh_margin: Duration,
    registrations: AtomicU64,
}

impl AuthTokenBroker {
    pub fn new(registrar: Arc<dyn TokenRegistrar>, refresh_margin: Duration) -> Self {
        Self {
            registrar,
            tokens: DashMap::new(),
            refresh_margin,
            registrations: AtomicU64::new(0),
        }
    }

    fn slot(&self, repository_id: &str) -> TokenSlot {
        self.tokens
            .entry(repository_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Valid token for the repository, registering one if needed.
    pub async fn get_or_register(
        &self,
        repository_id: &str,
        username: &str,
        password: &str,
    ) -> Result<AuthToken> {
        let slot = self.slot(repository_id);
        let mut cached = slot.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.username == username && token.is_valid_at(Utc::now(), self.refresh_margin) {
                debug!(repository_id, "Reusing cached token");
                return Ok(token.clone());
            }
            info!(repository_id, expires_at = %token.expires_at, "Cached token expired, registering a new one");
        }

        *cached = None;
        let token = self
            .registrar
            .register(repository_id, username, password)
            .await?;
        self.registrations.fetch_add(1, Ordering::Relaxed);
        *cached = Some(token.clone());
        Ok(token)
    }

    pub async fn token_for(&self, credentials: &RepositoryCredentials) -> Result<AuthToken> {
        self.get_or_register(&credentials.id, &credentials.username, &credentials.password)
            .await
    }

    /// Drop the cached token, e.g. after the server refused it.
    pub async fn invalidate(&self, repository_id: &str) {
        let slot = self.tokens.get(repository_id).map(|s| s.value().clone());
        if let Some(slot) = slot {
            *slot.lock().await = None;
            debug!(repository_id, "Invalidated token");
        }
    }

    /// Successful registrations since construction.
    pub fn registration_count(&self) -> u64 {
        self.registrations.load(Ordering::Relaxed)
    }
}
