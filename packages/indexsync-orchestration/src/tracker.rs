//! Change-feed tracker
//!
//! Turns feed events (delta) or the full object listing (full) into batched
//! index operations and moves the repository cursor.
//!
//! Delta pass, per page:
//! 1. pull up to `delta_page_size` events after the cursor
//! 2. coalesce to the last event per object
//! 3. per batch of `batch_size` changes: fetch, filter, project, commit
//! 4. advance the cursor to the batch's highest sequence
//!
//! With the `at_least_once` policy a batch containing a failed item moves the
//! cursor to just before that item's first event and ends the run, so the
//! next run replays it. `best_effort` logs the failure and keeps going.

use indexsync_core::config::{CursorPolicy, TrackingConfig};
use indexsync_core::features::cache::{CacheRegion, CacheService};
use indexsync_core::features::query::escape;
use indexsync_storage::{
    ChangeFeedSource, ChangeType, ContentObject, ContentSource, CursorStore, IndexDocument,
    IndexOperation, SearchIndexClient, StorageError,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coalesce::{coalesce, CoalescedChange, MimeTypeFilter};
use crate::cursor::CursorManager;
use crate::document::build_document;
use crate::error::{OrchestratorError, Result};
use crate::retry::RetryPolicy;
use crate::run::{RunStats, TrackingMode};

/// Result of a single-object maintenance call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOutcome {
    Indexed,
    Removed,
    /// Not trackable (base type or mime type)
    Skipped,
}

pub struct ChangeTracker {
    feed: Arc<dyn ChangeFeedSource>,
    content: Arc<dyn ContentSource>,
    index: Arc<dyn SearchIndexClient>,
    cursors: CursorManager,
    caches: Arc<CacheService>,
    tracking: TrackingConfig,
    filter: MimeTypeFilter,
    retry: RetryPolicy,
}

impl ChangeTracker {
    pub fn new(
        feed: Arc<dyn ChangeFeedSource>,
        content: Arc<dyn ContentSource>,
        index: Arc<dyn SearchIndexClient>,
        cursor_store: Arc<dyn CursorStore>,
        caches: Arc<CacheService>,
        tracking: TrackingConfig,
    ) -> Self {
        Self {
            feed,
            content,
            index,
            cursors: CursorManager::new(cursor_store),
            caches,
            filter: MimeTypeFilter::from_config(&tracking),
            tracking,
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for transient feed and fetch failures.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cursors(&self) -> &CursorManager {
        &self.cursors
    }

    pub fn index_client(&self) -> &Arc<dyn SearchIndexClient> {
        &self.index
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Actions
    // ═══════════════════════════════════════════════════════════════════════

    /// Destructive reset: drop every indexed document, the cursor and the
    /// repository's cache entries.
    pub async fn init(&self, repository_id: &str) -> Result<RunStats> {
        let before = self.cursors.current(repository_id).await?;
        self.index.remove_repository(repository_id).await?;
        self.cursors.reset(repository_id).await?;

        let cache = self.caches.for_repository(repository_id);
        for region in CacheRegion::ALL {
            cache.region(region).remove_all();
        }
        info!(repository_id, previous_cursor = before, "Initialized tracking");
        Ok(RunStats {
            cursor_before: before,
            ..Default::default()
        })
    }

    pub async fn index(
        &self,
        repository_id: &str,
        mode: TrackingMode,
        cancel: &CancellationToken,
    ) -> Result<RunStats> {
        match mode {
            TrackingMode::Delta => self.index_delta(repository_id, cancel).await,
            TrackingMode::Full => self.index_full(repository_id, cancel).await,
        }
    }

    /// Apply feed events after the cursor until the feed is drained.
    pub async fn index_delta(
        &self,
        repository_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunStats> {
        let mut stats = RunStats::default();
        let mut cursor = self.cursors.current(repository_id).await?;
        stats.cursor_before = cursor;
        let page_size = self.tracking.delta_page_size.max(1);
        let batch_size = self.tracking.batch_size.max(1);

        'pages: loop {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let since = cursor;
            let events = self
                .retry
                .run(
                    "change feed pull",
                    || self.feed.changes_since(repository_id, since, page_size),
                    StorageError::is_transient,
                )
                .await?;
            let Some(page_last) = events.iter().map(|e| e.sequence).max() else {
                break;
            };
            if page_last <= cursor {
                warn!(
                    repository_id,
                    cursor, page_last, "Feed returned no events after the cursor"
                );
                break;
            }
            stats.events_seen += events.len();

            let (changes, superseded) = coalesce(events);
            stats.superseded += superseded;
            // Changes are ordered by last sequence, so a later change can start
            // below the end of an earlier chunk. The cursor must stay under the
            // first sequence of every change not yet applied.
            let mut pending_floor = vec![u64::MAX; changes.len() + 1];
            for (k, change) in changes.iter().enumerate().rev() {
                pending_floor[k] = pending_floor[k + 1].min(change.first_sequence);
            }

            for (i, chunk) in changes.chunks(batch_size).enumerate() {
                if i > 0 && cancel.is_cancelled() {
                    stats.cancelled = true;
                    break 'pages;
                }

                let failed = self.apply_changes(repository_id, chunk, &mut stats).await;
                let chunk_last = chunk
                    .iter()
                    .map(CoalescedChange::last_sequence)
                    .max()
                    .unwrap_or(cursor);

                match self.tracking.cursor_policy {
                    CursorPolicy::AtLeastOnce if !failed.is_empty() => {
                        let first_failed = failed
                            .iter()
                            .map(|c| c.first_sequence)
                            .min()
                            .unwrap_or(chunk_last);
                        cursor = self
                            .cursors
                            .advance(repository_id, first_failed.saturating_sub(1))
                            .await?;
                        warn!(
                            repository_id,
                            failed = failed.len(),
                            cursor,
                            "Stopping at first failed change"
                        );
                        stats.cursor_after = cursor;
                        return Ok(stats);
                    }
                    _ => {
                        let next = ((i + 1) * batch_size).min(changes.len());
                        let safe = chunk_last.min(pending_floor[next].saturating_sub(1));
                        cursor = self.cursors.advance(repository_id, safe).await?;
                    }
                }
            }
        }

        stats.cursor_after = cursor;
        info!(
            repository_id,
            events = stats.events_seen,
            indexed = stats.indexed,
            removed = stats.removed,
            skipped = stats.skipped,
            failed = stats.failed,
            cursor,
            "Delta pass finished"
        );
        Ok(stats)
    }

    /// Index every object of the repository regardless of the cursor.
    ///
    /// The feed's latest sequence is captured first; a pass without failures
    /// moves the cursor there.
    pub async fn index_full(
        &self,
        repository_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunStats> {
        let mut stats = RunStats::default();
        stats.cursor_before = self.cursors.current(repository_id).await?;
        let latest = self
            .retry
            .run(
                "latest sequence",
                || self.feed.latest_sequence(repository_id),
                StorageError::is_transient,
            )
            .await?;

        let page_size = self.tracking.full_page_size.max(1);
        let batch_size = self.tracking.batch_size.max(1);
        let cache = self.caches.for_repository(repository_id);
        let mut offset = 0;

        'pages: loop {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            let ids = self
                .retry
                .run(
                    "object listing",
                    || self.content.list_object_ids(repository_id, offset, page_size),
                    StorageError::is_transient,
                )
                .await?;
            if ids.is_empty() {
                break;
            }
            offset += ids.len();
            stats.events_seen += ids.len();

            for (i, chunk) in ids.chunks(batch_size).enumerate() {
                if i > 0 && cancel.is_cancelled() {
                    stats.cancelled = true;
                    break 'pages;
                }
                let mut positions = Vec::with_capacity(chunk.len());
                let mut ops = Vec::with_capacity(chunk.len());
                for (pos, object_id) in chunk.iter().enumerate() {
                    cache.invalidate_object(object_id);
                    match self.fetch(repository_id, object_id).await {
                        Ok(Some(object)) => {
                            match self.plan_object(repository_id, object_id, Some(object), false) {
                                Some(op) => {
                                    positions.push(pos);
                                    ops.push(op);
                                }
                                None => stats.skipped += 1,
                            }
                        }
                        // Deleted between listing and fetch; the feed will report it.
                        Ok(None) => stats.skipped += 1,
                        Err(err) => {
                            warn!(repository_id, object_id = %object_id, error = %err, "Skipping object");
                            stats.failed += 1;
                        }
                    }
                }
                self.commit(repository_id, &positions, &ops, &mut stats).await;
            }

            if ids.len() < page_size {
                break;
            }
        }

        stats.cursor_after = if stats.failed == 0 && !stats.cancelled {
            self.cursors.advance(repository_id, latest).await?
        } else {
            self.cursors.current(repository_id).await?
        };
        info!(
            repository_id,
            objects = stats.events_seen,
            indexed = stats.indexed,
            skipped = stats.skipped,
            failed = stats.failed,
            cursor = stats.cursor_after,
            "Full pass finished"
        );
        Ok(stats)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Single-object maintenance
    // ═══════════════════════════════════════════════════════════════════════

    /// Re-read one object and bring its index document up to date.
    pub async fn reindex_object(
        &self,
        repository_id: &str,
        object_id: &str,
    ) -> Result<ObjectOutcome> {
        self.caches
            .for_repository(repository_id)
            .invalidate_object(object_id);
        let object = self.fetch(repository_id, object_id).await?;
        let Some(op) = self.plan_object(repository_id, object_id, object, true) else {
            return Ok(ObjectOutcome::Skipped);
        };
        let outcome = match op {
            IndexOperation::Upsert(_) => ObjectOutcome::Indexed,
            IndexOperation::Remove { .. } => ObjectOutcome::Removed,
        };
        self.commit_single(op).await?;
        Ok(outcome)
    }

    pub async fn remove_object(&self, repository_id: &str, object_id: &str) -> Result<()> {
        self.commit_single(IndexOperation::remove(repository_id, object_id))
            .await?;
        self.caches
            .for_repository(repository_id)
            .invalidate_object(object_id);
        Ok(())
    }

    /// Search the index for `text` taken literally.
    pub async fn search(
        &self,
        repository_id: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<IndexDocument>> {
        Ok(self
            .index
            .search(repository_id, &escape(text.trim()), limit)
            .await?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    async fn fetch(&self, repository_id: &str, object_id: &str) -> Result<Option<ContentObject>> {
        Ok(self
            .retry
            .run(
                "object fetch",
                || self.content.fetch_object(repository_id, object_id),
                StorageError::is_transient,
            )
            .await?)
    }

    /// Plan, then commit one batch of changes. Returns the changes that failed.
    async fn apply_changes<'c>(
        &self,
        repository_id: &str,
        chunk: &'c [CoalescedChange],
        stats: &mut RunStats,
    ) -> Vec<&'c CoalescedChange> {
        let mut positions = Vec::with_capacity(chunk.len());
        let mut ops = Vec::with_capacity(chunk.len());
        let mut failed = Vec::new();

        for (pos, change) in chunk.iter().enumerate() {
            match self.plan_change(repository_id, change).await {
                Ok(Some(op)) => {
                    positions.push(pos);
                    ops.push(op);
                }
                Ok(None) => stats.skipped += 1,
                Err(err) => {
                    warn!(
                        repository_id,
                        object_id = %change.object_id(),
                        sequence = change.last_sequence(),
                        error = %err,
                        "Skipping change"
                    );
                    stats.failed += 1;
                    failed.push(pos);
                }
            }
        }

        failed.extend(self.commit(repository_id, &positions, &ops, stats).await);
        failed.into_iter().map(|pos| &chunk[pos]).collect()
    }

    async fn plan_change(
        &self,
        repository_id: &str,
        change: &CoalescedChange,
    ) -> Result<Option<IndexOperation>> {
        let object_id = change.object_id();
        let cache = self.caches.for_repository(repository_id);

        match change.event.change_type {
            // ACLs are not indexed; the event only moves the cursor.
            ChangeType::SecurityChanged => Ok(None),
            ChangeType::Deleted => {
                cache.invalidate_object(object_id);
                match self.index.get_document(repository_id, object_id).await {
                    Ok(Some(existing)) => {
                        if let Some(parent) = existing.text_field("parent_id") {
                            cache.invalidate_tree(parent);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => debug!(repository_id, object_id, error = %err, "Parent lookup failed"),
                }
                Ok(Some(IndexOperation::remove(repository_id, object_id)))
            }
            ChangeType::Created | ChangeType::Updated => {
                let created = change.event.change_type == ChangeType::Created;
                if let Some(mime) = change.event.mime_type.as_deref() {
                    if !self.filter.allows(Some(mime)) {
                        return Ok((!created).then(|| IndexOperation::remove(repository_id, object_id)));
                    }
                }

                cache.invalidate_object(object_id);
                let object = self.fetch(repository_id, object_id).await?;
                if created {
                    if let Some(parent) = object.as_ref().and_then(|o| o.parent_id.as_deref()) {
                        cache.invalidate_tree(parent);
                    }
                }
                Ok(self.plan_object(repository_id, object_id, object, !created))
            }
        }
    }

    /// Index operation for the current state of an object, if any.
    ///
    /// `may_be_indexed` turns a newly filtered object into a removal.
    fn plan_object(
        &self,
        repository_id: &str,
        object_id: &str,
        object: Option<ContentObject>,
        may_be_indexed: bool,
    ) -> Option<IndexOperation> {
        match object {
            None => Some(IndexOperation::remove(repository_id, object_id)),
            Some(object) if !object.base_type.is_indexable() => None,
            Some(object) if !self.filter.allows(object.mime_type.as_deref()) => {
                may_be_indexed.then(|| IndexOperation::remove(repository_id, object_id))
            }
            Some(object) => Some(IndexOperation::Upsert(build_document(
                &object,
                self.tracking.fulltext_enabled,
            ))),
        }
    }

    /// Commit `ops`, falling back to one-by-one commits if the batch fails.
    ///
    /// `positions[i]` is the caller's position of `ops[i]`; failed positions
    /// are returned.
    async fn commit(
        &self,
        repository_id: &str,
        positions: &[usize],
        ops: &[IndexOperation],
        stats: &mut RunStats,
    ) -> Vec<usize> {
        if ops.is_empty() {
            return Vec::new();
        }
        stats.batches += 1;
        let mut failed = Vec::new();

        match self.index.commit_batch(ops).await {
            Ok(outcome) => {
                let rejected: HashSet<usize> =
                    outcome.rejected.iter().map(|r| r.position).collect();
                for r in &outcome.rejected {
                    warn!(repository_id, object_id = %r.object_id, reason = %r.reason, "Index rejected document");
                }
                for (i, op) in ops.iter().enumerate() {
                    if rejected.contains(&i) {
                        failed.push(positions[i]);
                    } else {
                        count(op, stats);
                    }
                }
            }
            Err(err) => {
                warn!(
                    repository_id,
                    operations = ops.len(),
                    error = %err,
                    "Batch commit failed, retrying operations one by one"
                );
                for (i, op) in ops.iter().enumerate() {
                    match self.index.commit_batch(std::slice::from_ref(op)).await {
                        Ok(outcome) if outcome.rejected.is_empty() => count(op, stats),
                        Ok(outcome) => {
                            let reason = outcome
                                .rejected
                                .first()
                                .map(|r| r.reason.as_str())
                                .unwrap_or("rejected");
                            warn!(repository_id, object_id = %op.object_id(), reason, "Index rejected document");
                            failed.push(positions[i]);
                        }
                        Err(err) => {
                            warn!(repository_id, object_id = %op.object_id(), error = %err, "Index commit failed");
                            failed.push(positions[i]);
                        }
                    }
                }
            }
        }
        stats.failed += failed.len();
        failed
    }

    async fn commit_single(&self, op: IndexOperation) -> Result<()> {
        let outcome = self.index.commit_batch(std::slice::from_ref(&op)).await?;
        match outcome.rejected.first() {
            Some(rejected) => Err(OrchestratorError::document(
                op.repository_id(),
                op.object_id(),
                &rejected.reason,
            )),
            None => Ok(()),
        }
    }
}

fn count(op: &IndexOperation, stats: &mut RunStats) {
    match op {
        IndexOperation::Upsert(_) => stats.indexed += 1,
        IndexOperation::Remove { .. } => stats.removed += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexsync_core::config::CacheConfig;
    use indexsync_core::features::cache::RequestContext;
    use indexsync_core::features::locking::ObjectLockManager;
    use indexsync_storage::{InMemoryCursorStore, InMemoryRepository, InMemorySearchIndex};

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        index: Arc<InMemorySearchIndex>,
        tracker: ChangeTracker,
    }

    fn fixture(tracking: TrackingConfig) -> Fixture {
        let caches = Arc::new(CacheService::new(&CacheConfig::default()));
        let repo = Arc::new(InMemoryRepository::new(
            Arc::new(ObjectLockManager::with_stripes(64)),
            Arc::clone(&caches),
        ));
        repo.add_repository("r");
        let index = Arc::new(InMemorySearchIndex::new());
        let tracker = ChangeTracker::new(
            repo.clone(),
            repo.clone(),
            index.clone(),
            Arc::new(InMemoryCursorStore::new()),
            caches,
            tracking,
        )
        .with_retry(RetryPolicy::none());
        Fixture {
            repo,
            index,
            tracker,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::begin("r", "admin")
    }

    #[tokio::test]
    async fn test_security_events_move_cursor_only() {
        let f = fixture(TrackingConfig::default());
        f.repo
            .create_object(&ctx(), ContentObject::document("r", "a", "a", "admin"))
            .unwrap();
        f.repo.change_security(&ctx(), "a").unwrap();

        let stats = f
            .tracker
            .index_delta("r", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.superseded, 1);
        assert_eq!(stats.cursor_after, 2);
    }

    #[tokio::test]
    async fn test_cursor_held_below_pending_change_until_page_ends() {
        let f = fixture(TrackingConfig {
            batch_size: 1,
            ..Default::default()
        });
        for id in ["a", "b"] {
            f.repo
                .create_object(&ctx(), ContentObject::document("r", id, id, "admin"))
                .unwrap();
        }
        f.repo.change_security(&ctx(), "a").unwrap();
        f.repo.fail_fetches("a", 1);

        let stats = f
            .tracker
            .index_delta("r", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cursor_after, 0);

        let stats = f
            .tracker
            .index_delta("r", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.cursor_after, 3);
        assert!(f.index.get_document("r", "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_relationships_are_not_indexed() {
        let f = fixture(TrackingConfig::default());
        let mut rel = ContentObject::document("r", "rel", "rel", "admin");
        rel.base_type = indexsync_storage::BaseType::Relationship;
        f.repo.create_object(&ctx(), rel).unwrap();
        f.repo
            .create_object(&ctx(), ContentObject::folder("r", "f", "docs", "admin"))
            .unwrap();

        let stats = f
            .tracker
            .index_delta("r", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(f.index.object_ids("r"), vec!["f".to_string()]);
        assert_eq!(stats.cursor_after, 2);
    }

    #[tokio::test]
    async fn test_update_to_filtered_mime_type_removes_document() {
        let f = fixture(TrackingConfig {
            mime_types: "text/plain".into(),
            ..Default::default()
        });
        let ctx = ctx();
        f.repo
            .create_object(
                &ctx,
                ContentObject::document("r", "a", "a", "admin").with_content("text/plain", "x"),
            )
            .unwrap();
        f.tracker
            .index_delta("r", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(f.index.object_ids("r").len(), 1);

        let object = f.repo.get_object(&ctx, "a").unwrap();
        f.repo
            .update_object(&ctx, object.with_content("image/png", "binary"))
            .unwrap();
        let stats = f
            .tracker
            .index_delta("r", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.removed, 1);
        assert!(f.index.object_ids("r").is_empty());
    }

    #[tokio::test]
    async fn test_page_and_batch_sizes_bound_each_step() {
        let f = fixture(TrackingConfig {
            batch_size: 2,
            delta_page_size: 3,
            ..Default::default()
        });
        for i in 0..7 {
            let id = format!("doc-{}", i);
            f.repo
                .create_object(&ctx(), ContentObject::document("r", &id, &id, "admin"))
                .unwrap();
        }
        let stats = f
            .tracker
            .index_delta("r", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.indexed, 7);
        // pages of 3, 3, 1 events; batches of 2+1, 2+1, 1
        assert_eq!(stats.batches, 5);
        assert_eq!(stats.cursor_after, 7);
    }

    #[tokio::test]
    async fn test_reindex_and_remove_single_object() {
        let f = fixture(TrackingConfig::default());
        f.repo
            .create_object(&ctx(), ContentObject::document("r", "a", "a", "admin"))
            .unwrap();

        assert_eq!(
            f.tracker.reindex_object("r", "a").await.unwrap(),
            ObjectOutcome::Indexed
        );
        assert_eq!(f.index.object_ids("r"), vec!["a".to_string()]);
        // Cursor untouched by maintenance calls
        assert_eq!(f.tracker.cursors().current("r").await.unwrap(), 0);

        f.tracker.remove_object("r", "a").await.unwrap();
        assert!(f.index.object_ids("r").is_empty());

        assert_eq!(
            f.tracker.reindex_object("r", "missing").await.unwrap(),
            ObjectOutcome::Removed
        );

        f.index.refuse_object("a");
        let err = f.tracker.reindex_object("r", "a").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Document { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let f = fixture(TrackingConfig::default());
        f.repo
            .create_object(&ctx(), ContentObject::document("r", "a", "a", "admin"))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = f.tracker.index_delta("r", &cancel).await.unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.cursor_after, 0);
        assert!(f.index.object_ids("r").is_empty());
    }

    #[tokio::test]
    async fn test_search_takes_text_literally() {
        let f = fixture(TrackingConfig::default());
        f.repo
            .create_object(
                &ctx(),
                ContentObject::document("r", "a", "budget (draft).xlsx", "admin"),
            )
            .unwrap();
        f.tracker
            .index_delta("r", &CancellationToken::new())
            .await
            .unwrap();

        let hits = f.tracker.search("r", "(draft)", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(f.tracker.search("r", "final", 10).await.unwrap().is_empty());
    }
}
