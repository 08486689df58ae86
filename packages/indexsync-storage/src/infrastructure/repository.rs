//! In-process document store with a change feed
//!
//! Mutations take per-object write locks from the shared
//! [`ObjectLockManager`], append to the repository's change feed and
//! invalidate the layered cache. Reads go through the node region of the
//! cache. Each mutating call receives the caller's [`RequestContext`], whose
//! request cache memoizes the latest-change lookup.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use indexsync_core::features::cache::{
    CacheRegion, CacheService, RequestContext, LATEST_CHANGE_KEY,
};
use indexsync_core::features::locking::{LockRequest, ObjectLockManager};

use crate::domain::{ChangeEvent, ChangeFeedSource, ChangeType, ContentObject, ContentSource};
use crate::{Result, StorageError};

#[derive(Default)]
struct RepositoryState {
    objects: BTreeMap<String, ContentObject>,
    feed: Vec<ChangeEvent>,
}

impl RepositoryState {
    fn latest_sequence(&self) -> u64 {
        self.feed.last().map(|e| e.sequence).unwrap_or(0)
    }

    fn append(&mut self, repository_id: &str, object: &ContentObject, change: ChangeType) -> u64 {
        let sequence = self.latest_sequence() + 1;
        let mut event = ChangeEvent::new(repository_id, object.id.as_str(), change, sequence);
        event.mime_type = object.mime_type.clone();
        self.feed.push(event);
        sequence
    }
}

/// Document store shared by the content-service side and the indexer.
pub struct InMemoryRepository {
    locks: Arc<ObjectLockManager>,
    caches: Arc<CacheService>,
    repositories: RwLock<HashMap<String, RepositoryState>>,
    /// Remaining transport failures to simulate per object id
    fetch_failures: Mutex<HashMap<String, usize>>,
}

impl InMemoryRepository {
    pub fn new(locks: Arc<ObjectLockManager>, caches: Arc<CacheService>) -> Self {
        Self {
            locks,
            caches,
            repositories: RwLock::new(HashMap::new()),
            fetch_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Register an empty repository.
    pub fn add_repository(&self, repository_id: &str) {
        self.repositories
            .write()
            .entry(repository_id.to_string())
            .or_default();
    }

    /// Make the next `times` fetches of `object_id` fail with a transport error.
    pub fn fail_fetches(&self, object_id: impl Into<String>, times: usize) {
        self.fetch_failures.lock().insert(object_id.into(), times);
    }

    pub fn create_object(&self, ctx: &RequestContext, object: ContentObject) -> Result<u64> {
        let repository_id = ctx.repository_id();
        let _guard = self.locks.acquire_write(repository_id, &object.id);

        let sequence = {
            let mut repos = self.repositories.write();
            let repo = repos
                .get_mut(repository_id)
                .ok_or_else(|| StorageError::repository_not_found(repository_id))?;
            if repo.objects.contains_key(&object.id) {
                return Err(StorageError::object_exists(repository_id, &object.id));
            }
            let sequence = repo.append(repository_id, &object, ChangeType::Created);
            repo.objects.insert(object.id.clone(), object.clone());
            sequence
        };

        let cache = self.caches.for_repository(repository_id);
        cache.invalidate_object(&object.id);
        if let Some(parent) = &object.parent_id {
            cache.invalidate_tree(parent);
        }
        ctx.cache().set(LATEST_CHANGE_KEY, sequence);
        debug!(
            repository_id,
            object_id = %object.id,
            sequence,
            user = ctx.user(),
            "Created object"
        );
        Ok(sequence)
    }

    pub fn update_object(&self, ctx: &RequestContext, mut object: ContentObject) -> Result<u64> {
        let repository_id = ctx.repository_id();
        let _guard = self.locks.acquire_write(repository_id, &object.id);

        let sequence = {
            let mut repos = self.repositories.write();
            let repo = repos
                .get_mut(repository_id)
                .ok_or_else(|| StorageError::repository_not_found(repository_id))?;
            if !repo.objects.contains_key(&object.id) {
                return Err(StorageError::object_not_found(repository_id, &object.id));
            }
            object.modified_by = ctx.user().to_string();
            object.modified_at = Utc::now();
            let sequence = repo.append(repository_id, &object, ChangeType::Updated);
            repo.objects.insert(object.id.clone(), object.clone());
            sequence
        };

        self.caches
            .for_repository(repository_id)
            .invalidate_object(&object.id);
        ctx.cache().set(LATEST_CHANGE_KEY, sequence);
        Ok(sequence)
    }

    /// Record an ACL change. The object itself is unchanged.
    pub fn change_security(&self, ctx: &RequestContext, object_id: &str) -> Result<u64> {
        let repository_id = ctx.repository_id();
        let _guard = self.locks.acquire_write(repository_id, object_id);

        let mut repos = self.repositories.write();
        let repo = repos
            .get_mut(repository_id)
            .ok_or_else(|| StorageError::repository_not_found(repository_id))?;
        let object = repo
            .objects
            .get(object_id)
            .cloned()
            .ok_or_else(|| StorageError::object_not_found(repository_id, object_id))?;
        let sequence = repo.append(repository_id, &object, ChangeType::SecurityChanged);
        ctx.cache().set(LATEST_CHANGE_KEY, sequence);
        Ok(sequence)
    }

    pub fn delete_object(&self, ctx: &RequestContext, object_id: &str) -> Result<u64> {
        let sequences = self.delete_objects(ctx, &[object_id])?;
        sequences
            .last()
            .copied()
            .ok_or_else(|| StorageError::object_not_found(ctx.repository_id(), object_id))
    }

    /// Delete several objects atomically with respect to other writers.
    /// All write locks are taken up front (bulk, canonical order).
    pub fn delete_objects<S: AsRef<str>>(
        &self,
        ctx: &RequestContext,
        object_ids: &[S],
    ) -> Result<Vec<u64>> {
        let repository_id = ctx.repository_id();
        let ids: Vec<&str> = object_ids.iter().map(|id| id.as_ref()).collect();
        let requests = ids
            .iter()
            .map(|id| LockRequest::write(repository_id, *id))
            .collect::<Vec<_>>();
        let guard = self.locks.bulk_lock(&requests);

        let (sequences, parents) = {
            let mut repos = self.repositories.write();
            let repo = repos
                .get_mut(repository_id)
                .ok_or_else(|| StorageError::repository_not_found(repository_id))?;
            if let Some(missing) = ids.iter().find(|id| !repo.objects.contains_key(**id)) {
                return Err(StorageError::object_not_found(repository_id, missing));
            }
            let mut sequences = Vec::with_capacity(ids.len());
            let mut parents = Vec::new();
            for id in &ids {
                if let Some(object) = repo.objects.remove(*id) {
                    sequences.push(repo.append(repository_id, &object, ChangeType::Deleted));
                    parents.extend(object.parent_id);
                }
            }
            (sequences, parents)
        };
        self.locks.bulk_unlock(guard);

        let cache = self.caches.for_repository(repository_id);
        for id in &ids {
            cache.invalidate_object(id);
        }
        for parent in &parents {
            cache.invalidate_tree(parent);
        }
        if let Some(last) = sequences.last() {
            ctx.cache().set(LATEST_CHANGE_KEY, *last);
        }
        Ok(sequences)
    }

    /// Current object state, read through the node cache.
    pub fn get_object(&self, ctx: &RequestContext, object_id: &str) -> Option<ContentObject> {
        let repository_id = ctx.repository_id();
        let cache = self.caches.for_repository(repository_id);
        let nodes = cache.region(CacheRegion::Node);
        if let Some(hit) = nodes.get::<ContentObject>(object_id) {
            return Some(hit);
        }

        let _guard = self.locks.acquire_read(repository_id, object_id);
        let object = self
            .repositories
            .read()
            .get(repository_id)
            .and_then(|repo| repo.objects.get(object_id).cloned())?;
        nodes.put(object_id, &object);
        Some(object)
    }

    /// Consistent snapshot of several objects under shared locks.
    pub fn get_objects<S: AsRef<str>>(
        &self,
        ctx: &RequestContext,
        object_ids: &[S],
    ) -> Vec<ContentObject> {
        let repository_id = ctx.repository_id();
        let ids: Vec<&str> = object_ids.iter().map(|id| id.as_ref()).collect();
        let _guard = self.locks.read_locks(repository_id, &ids);
        let repos = self.repositories.read();
        let Some(repo) = repos.get(repository_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| repo.objects.get(*id).cloned())
            .collect()
    }

    /// Children of a folder, read through the tree cache.
    pub fn children(&self, ctx: &RequestContext, folder_id: &str) -> Vec<String> {
        let repository_id = ctx.repository_id();
        let cache = self.caches.for_repository(repository_id);
        let tree = cache.region(CacheRegion::Tree);
        if let Some(hit) = tree.get::<Vec<String>>(folder_id) {
            return hit;
        }
        let children = self
            .repositories
            .read()
            .get(repository_id)
            .map(|repo| {
                repo.objects
                    .values()
                    .filter(|o| o.parent_id.as_deref() == Some(folder_id))
                    .map(|o| o.id.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        tree.put(folder_id, &children);
        children
    }

    /// Latest change sequence, looked up at most once per request.
    pub fn latest_change(&self, ctx: &RequestContext) -> u64 {
        ctx.latest_change(|| {
            self.repositories
                .read()
                .get(ctx.repository_id())
                .map(RepositoryState::latest_sequence)
                .unwrap_or(0)
        })
    }

    fn take_fetch_failure(&self, object_id: &str) -> bool {
        let mut failures = self.fetch_failures.lock();
        match failures.get_mut(object_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ChangeFeedSource for InMemoryRepository {
    async fn changes_since(
        &self,
        repository_id: &str,
        since: u64,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>> {
        let repos = self.repositories.read();
        let repo = repos
            .get(repository_id)
            .ok_or_else(|| StorageError::repository_not_found(repository_id))?;
        // Sequences are dense and start at 1.
        let start = usize::try_from(since).unwrap_or(usize::MAX).min(repo.feed.len());
        Ok(repo.feed[start..].iter().take(limit).cloned().collect())
    }

    async fn latest_sequence(&self, repository_id: &str) -> Result<u64> {
        self.repositories
            .read()
            .get(repository_id)
            .map(RepositoryState::latest_sequence)
            .ok_or_else(|| StorageError::repository_not_found(repository_id))
    }
}

#[async_trait]
impl ContentSource for InMemoryRepository {
    async fn fetch_object(
        &self,
        repository_id: &str,
        object_id: &str,
    ) -> Result<Option<ContentObject>> {
        if self.take_fetch_failure(object_id) {
            return Err(StorageError::transport(format!(
                "simulated connection reset fetching {}/{}",
                repository_id, object_id
            )));
        }
        if !self.repositories.read().contains_key(repository_id) {
            return Err(StorageError::repository_not_found(repository_id));
        }
        let ctx = RequestContext::begin(repository_id, "indexer");
        Ok(self.get_object(&ctx, object_id))
    }

    async fn list_object_ids(
        &self,
        repository_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>> {
        let repos = self.repositories.read();
        let repo = repos
            .get(repository_id)
            .ok_or_else(|| StorageError::repository_not_found(repository_id))?;
        Ok(repo
            .objects
            .keys()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
