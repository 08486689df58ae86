//! In-memory collaborators wired into a tracker

use async_trait::async_trait;
use indexsync_core::config::{CacheConfig, TrackingConfig};
use indexsync_core::features::cache::{CacheService, RequestContext};
use indexsync_core::features::locking::ObjectLockManager;
use indexsync_orchestration::{ChangeTracker, RetryPolicy, SyncOrchestrator};
use indexsync_storage::{
    ChangeEvent, ChangeFeedSource, ContentObject, InMemoryCursorStore, InMemoryRepository,
    InMemorySearchIndex, Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const REPO: &str = "bedroom";

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

pub struct Harness {
    pub repo: Arc<InMemoryRepository>,
    pub index: Arc<InMemorySearchIndex>,
    pub cursors: Arc<InMemoryCursorStore>,
    pub caches: Arc<CacheService>,
    pub tracker: Arc<ChangeTracker>,
}

impl Harness {
    pub fn new(tracking: TrackingConfig) -> Self {
        let caches = Arc::new(CacheService::new(&CacheConfig::default()));
        let repo = Arc::new(InMemoryRepository::new(
            Arc::new(ObjectLockManager::with_stripes(256)),
            Arc::clone(&caches),
        ));
        repo.add_repository(REPO);
        Self::with_feed(repo.clone(), repo, caches, tracking)
    }

    /// Harness whose feed is `feed` instead of the repository itself.
    pub fn with_feed(
        feed: Arc<dyn ChangeFeedSource>,
        repo: Arc<InMemoryRepository>,
        caches: Arc<CacheService>,
        tracking: TrackingConfig,
    ) -> Self {
        let index = Arc::new(InMemorySearchIndex::new());
        let cursors = Arc::new(InMemoryCursorStore::new());
        let tracker = Arc::new(
            ChangeTracker::new(
                feed,
                repo.clone(),
                index.clone(),
                cursors.clone(),
                Arc::clone(&caches),
                tracking,
            )
            .with_retry(fast_retry()),
        );
        Self {
            repo,
            index,
            cursors,
            caches,
            tracker,
        }
    }

    pub fn orchestrator(&self, repositories: &[&str]) -> Arc<SyncOrchestrator> {
        Arc::new(SyncOrchestrator::new(
            Arc::clone(&self.tracker),
            repositories.iter().map(|r| r.to_string()).collect(),
        ))
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::begin(REPO, "admin")
    }

    pub fn create_text(&self, id: &str, mime: &str, text: &str) -> u64 {
        self.repo
            .create_object(
                &self.ctx(),
                ContentObject::document(REPO, id, format!("{}.doc", id), "admin")
                    .with_content(mime, text),
            )
            .unwrap()
    }

    pub fn delete(&self, id: &str) -> u64 {
        self.repo.delete_object(&self.ctx(), id).unwrap()
    }
}

/// Feed whose pulls block until the gate is opened.
pub struct GatedFeed {
    inner: Arc<InMemoryRepository>,
    open: AtomicBool,
    pub entered: Notify,
    release: Notify,
}

impl GatedFeed {
    pub fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self {
            inner,
            open: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Let the blocked pull and every later one through.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.release.notify_one();
    }
}

/// Harness whose change feed is gated, for tests that need a run in flight.
pub fn gated_harness(tracking: TrackingConfig) -> (Harness, Arc<GatedFeed>) {
    let caches = Arc::new(CacheService::new(&CacheConfig::default()));
    let repo = Arc::new(InMemoryRepository::new(
        Arc::new(ObjectLockManager::with_stripes(256)),
        Arc::clone(&caches),
    ));
    repo.add_repository(REPO);
    let feed = Arc::new(GatedFeed::new(repo.clone()));
    let harness = Harness::with_feed(feed.clone(), repo, caches, tracking);
    (harness, feed)
}

#[async_trait]
impl ChangeFeedSource for GatedFeed {
    async fn changes_since(
        &self,
        repository_id: &str,
        since: u64,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>> {
        if !self.open.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.changes_since(repository_id, since, limit).await
    }

    async fn latest_sequence(&self, repository_id: &str) -> Result<u64> {
        self.inner.latest_sequence(repository_id).await
    }
}
