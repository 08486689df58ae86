//! In-memory search index and cursor store
//!
//! Both are fully functional and used by tests and single-process setups.
//! The index understands a single literal term as its query language: the
//! query must be escaped the way the query sanitizer escapes user input.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use indexsync_core::features::query::parse_literal_term;

use crate::domain::{
    unique_id, BatchCommit, ChangeCursor, CursorStore, IndexDocument, IndexOperation,
    RejectedOperation, SearchIndexClient,
};
use crate::{Result, StorageError};

/// Search index held in a `BTreeMap` keyed by unique id.
#[derive(Default)]
pub struct InMemorySearchIndex {
    documents: RwLock<BTreeMap<String, IndexDocument>>,
    /// Object ids refused on upsert
    refused: Mutex<HashSet<String>>,
    /// Remaining whole-batch failures to simulate
    failing_commits: AtomicUsize,
    commits: AtomicUsize,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse upserts of `object_id` from now on.
    pub fn refuse_object(&self, object_id: impl Into<String>) {
        self.refused.lock().insert(object_id.into());
    }

    pub fn accept_object(&self, object_id: &str) {
        self.refused.lock().remove(object_id);
    }

    /// Make the next `n` batch commits fail as a whole.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Number of successful `commit_batch` calls.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Object ids indexed for a repository, sorted.
    pub fn object_ids(&self, repository_id: &str) -> Vec<String> {
        self.documents
            .read()
            .values()
            .filter(|doc| doc.repository_id == repository_id)
            .map(|doc| doc.object_id.clone())
            .collect()
    }
}

#[async_trait]
impl SearchIndexClient for InMemorySearchIndex {
    async fn commit_batch(&self, operations: &[IndexOperation]) -> Result<BatchCommit> {
        let simulated_failure = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if simulated_failure {
            return Err(StorageError::index("simulated batch failure"));
        }

        let refused = self.refused.lock().clone();
        let mut documents = self.documents.write();
        let mut outcome = BatchCommit::default();

        for (position, op) in operations.iter().enumerate() {
            match op {
                IndexOperation::Upsert(doc) if refused.contains(&doc.object_id) => {
                    outcome.rejected.push(RejectedOperation {
                        position,
                        object_id: doc.object_id.clone(),
                        reason: "document refused by index".to_string(),
                    });
                }
                IndexOperation::Upsert(doc) => {
                    documents.insert(doc.unique_id(), doc.clone());
                    outcome.committed += 1;
                }
                IndexOperation::Remove {
                    repository_id,
                    object_id,
                } => {
                    documents.remove(&unique_id(repository_id, object_id));
                    outcome.committed += 1;
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn get_document(
        &self,
        repository_id: &str,
        object_id: &str,
    ) -> Result<Option<IndexDocument>> {
        Ok(self
            .documents
            .read()
            .get(&unique_id(repository_id, object_id))
            .cloned())
    }

    async fn remove_repository(&self, repository_id: &str) -> Result<()> {
        self.documents
            .write()
            .retain(|_, doc| doc.repository_id != repository_id);
        Ok(())
    }

    async fn document_count(&self, repository_id: &str) -> Result<u64> {
        Ok(self
            .documents
            .read()
            .values()
            .filter(|doc| doc.repository_id == repository_id)
            .count() as u64)
    }

    async fn search(
        &self,
        repository_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<IndexDocument>> {
        let term = parse_literal_term(query)
            .map_err(|err| StorageError::rejected(format!("Invalid query '{}': {}", query, err)))?
            .to_lowercase();

        Ok(self
            .documents
            .read()
            .values()
            .filter(|doc| doc.repository_id == repository_id)
            .filter(|doc| {
                doc.fields
                    .iter()
                    .any(|(_, value)| value.to_search_text().to_lowercase().contains(&term))
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Cursor store held in a `HashMap`.
#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<String, ChangeCursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self, repository_id: &str) -> Result<Option<ChangeCursor>> {
        Ok(self.cursors.read().get(repository_id).cloned())
    }

    async fn store(&self, cursor: &ChangeCursor) -> Result<()> {
        self.cursors
            .write()
            .insert(cursor.repository_id.clone(), cursor.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ChangeCursor>> {
        let mut all = self.cursors.read().values().cloned().collect::<Vec<_>>();
        all.sort_by(|a, b| a.repository_id.cmp(&b.repository_id));
        Ok(all)
    }
}
