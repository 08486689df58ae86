//! Tracking over the on-disk index and cursor store, across restarts

mod common;

use common::*;
use indexsync_core::config::{CacheConfig, TrackingConfig};
use indexsync_core::features::cache::{CacheService, RequestContext};
use indexsync_core::features::locking::ObjectLockManager;
use indexsync_orchestration::{ChangeTracker, TrackingMode};
use indexsync_storage::{
    ContentObject, InMemoryRepository, SearchIndexClient, SqliteCursorStore, TantivySearchIndex,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const WRITER_MEMORY: usize = 50_000_000;

fn open_tracker(
    dir: &Path,
    repo: &Arc<InMemoryRepository>,
    caches: &Arc<CacheService>,
) -> ChangeTracker {
    let index = TantivySearchIndex::open_or_create(&dir.join("index"), WRITER_MEMORY).unwrap();
    let cursors = SqliteCursorStore::open(dir.join("cursors.db")).unwrap();
    ChangeTracker::new(
        repo.clone(),
        repo.clone(),
        Arc::new(index),
        Arc::new(cursors),
        Arc::clone(caches),
        TrackingConfig::default(),
    )
    .with_retry(fast_retry())
}

fn document(id: &str, text: &str) -> ContentObject {
    ContentObject::document(REPO, id, format!("{}.txt", id), "admin")
        .with_content("text/plain", text)
}

#[tokio::test]
async fn test_cursor_and_documents_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let caches = Arc::new(CacheService::new(&CacheConfig::default()));
    let repo = Arc::new(InMemoryRepository::new(
        Arc::new(ObjectLockManager::with_stripes(64)),
        Arc::clone(&caches),
    ));
    repo.add_repository(REPO);
    let ctx = RequestContext::begin(REPO, "admin");

    repo.create_object(&ctx, document("a", "alpha notes")).unwrap();
    repo.create_object(&ctx, document("b", "beta notes")).unwrap();

    {
        let tracker = open_tracker(dir.path(), &repo, &caches);
        let stats = tracker
            .index(REPO, TrackingMode::Delta, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.cursor_after, 2);
    }

    repo.delete_object(&ctx, "a").unwrap();
    repo.create_object(&ctx, document("c", "gamma notes")).unwrap();

    let tracker = open_tracker(dir.path(), &repo, &caches);
    assert_eq!(tracker.cursors().current(REPO).await.unwrap(), 2);

    let stats = tracker
        .index(REPO, TrackingMode::Delta, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.removed, 1);
    assert_eq!(stats.indexed, 1);
    assert_eq!(stats.cursor_after, 4);
    assert_eq!(tracker.index_client().document_count(REPO).await.unwrap(), 2);

    let hits = tracker.search(REPO, "gamma", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].object_id, "c");
    assert!(tracker.search(REPO, "alpha", 10).await.unwrap().is_empty());
}
