//! Request-scoped memoization
//!
//! A [`RequestContext`] is created by the caller at the start of every
//! authenticated request and passed down explicitly. Its cache starts empty
//! and is dropped with the request, so nothing leaks between requests and
//! concurrent requests never observe each other's entries.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Key of the memoized "latest content change" sequence.
pub const LATEST_CHANGE_KEY: &str = "latest_change";

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Typed key/value memo for a single request.
#[derive(Default)]
pub struct RequestScopedCache {
    entries: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl RequestScopedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` on a miss or when the stored value has another type.
    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.entries
            .lock()
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.entries.lock().insert(key.into(), Box::new(value));
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memoize `load` under `key`. `load` runs outside the internal lock.
    pub fn get_or_insert_with<T, F>(&self, key: &str, load: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(hit) = self.get::<T>(key) {
            return hit;
        }
        let value = load();
        self.set(key, value.clone());
        value
    }

    /// Fallible variant of [`get_or_insert_with`](Self::get_or_insert_with).
    /// Errors are not memoized.
    pub fn get_or_try_insert_with<T, E, F>(&self, key: &str, load: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(hit) = self.get::<T>(key) {
            return Ok(hit);
        }
        let value = load()?;
        self.set(key, value.clone());
        Ok(value)
    }
}

impl std::fmt::Debug for RequestScopedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScopedCache")
            .field("entries", &self.len())
            .finish()
    }
}

/// Call context of one authenticated request.
#[derive(Debug)]
pub struct RequestContext {
    request_id: u64,
    repository_id: String,
    user: String,
    cache: RequestScopedCache,
}

impl RequestContext {
    /// Start a request with an empty cache.
    pub fn begin(repository_id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            request_id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            repository_id: repository_id.into(),
            user: user.into(),
            cache: RequestScopedCache::new(),
        }
    }

    /// Reuse this context for the next request of a worker.
    /// The cache is cleared first.
    pub fn restart(&mut self, repository_id: impl Into<String>, user: impl Into<String>) {
        self.cache.clear();
        self.request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        self.repository_id = repository_id.into();
        self.user = user.into();
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn cache(&self) -> &RequestScopedCache {
        &self.cache
    }

    /// Latest change sequence, looked up at most once per request.
    pub fn latest_change<F>(&self, lookup: F) -> u64
    where
        F: FnOnce() -> u64,
    {
        self.cache.get_or_insert_with(LATEST_CHANGE_KEY, lookup)
    }
}
