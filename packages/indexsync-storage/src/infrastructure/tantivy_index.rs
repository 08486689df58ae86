//! Tantivy-backed search index
//!
//! # Schema
//!
//! 1. `id` - `{repository}_{object}` (STORED, keyword)
//! 2. `repository_id` - (STORED, keyword)
//! 3. `object_id` - (STORED, keyword)
//! 4. `mime_type` - (keyword)
//! 5. `parent_id` - (keyword)
//! 6. `text` - every field flattened (TEXT, not stored)
//! 7. `payload` - the full `IndexDocument` as JSON (STORED only)
//!
//! Upserts delete by `id` then add, and each batch ends with one commit.
//! Writer work runs on the blocking pool; any failure rolls the writer back
//! so nothing staged leaks into the next commit.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tantivy::{
    collector::{Count, TopDocs},
    doc,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::{
        Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED, TEXT,
    },
    Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term,
};
use tracing::{debug, info, warn};

use indexsync_core::features::query::sanitize_id;

use crate::domain::{
    unique_id, BatchCommit, IndexDocument, IndexOperation, RejectedOperation, SearchIndexClient,
};
use crate::{Result, StorageError};

pub const FIELD_ID: &str = "id";
pub const FIELD_REPOSITORY_ID: &str = "repository_id";
pub const FIELD_OBJECT_ID: &str = "object_id";
pub const FIELD_MIME_TYPE: &str = "mime_type";
pub const FIELD_PARENT_ID: &str = "parent_id";
pub const FIELD_TEXT: &str = "text";
pub const FIELD_PAYLOAD: &str = "payload";

/// Default writer heap
pub const DEFAULT_WRITER_MEMORY: usize = 50_000_000;

#[derive(Debug, Clone)]
struct SchemaFields {
    schema: Schema,
    id: Field,
    repository_id: Field,
    object_id: Field,
    mime_type: Field,
    parent_id: Field,
    text: Field,
    payload: Field,
}

impl SchemaFields {
    fn new() -> Self {
        let mut builder = Schema::builder();

        let keyword = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("raw")
                .set_index_option(IndexRecordOption::Basic),
        );
        let stored_keyword = keyword.clone().set_stored();

        let id = builder.add_text_field(FIELD_ID, stored_keyword.clone());
        let repository_id = builder.add_text_field(FIELD_REPOSITORY_ID, stored_keyword.clone());
        let object_id = builder.add_text_field(FIELD_OBJECT_ID, stored_keyword);
        let mime_type = builder.add_text_field(FIELD_MIME_TYPE, keyword.clone());
        let parent_id = builder.add_text_field(FIELD_PARENT_ID, keyword);
        let text = builder.add_text_field(FIELD_TEXT, TEXT);
        let payload = builder.add_text_field(FIELD_PAYLOAD, STORED);

        Self {
            schema: builder.build(),
            id,
            repository_id,
            object_id,
            mime_type,
            parent_id,
            text,
            payload,
        }
    }
}

pub struct TantivySearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<Mutex<IndexWriter>>,
    fields: SchemaFields,
}

/// Writer operation prepared outside the writer lock.
enum Staged {
    Upsert(Term, TantivyDocument),
    Remove(Term),
}

impl TantivySearchIndex {
    /// Volatile index, mostly for tests.
    pub fn in_ram() -> Result<Self> {
        let fields = SchemaFields::new();
        let index = Index::create_in_ram(fields.schema.clone());
        Self::from_index(index, fields, DEFAULT_WRITER_MEMORY)
    }

    /// Open the index in `dir`, creating it when absent.
    pub fn open_or_create(dir: &Path, writer_memory: usize) -> Result<Self> {
        let fields = SchemaFields::new();
        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir)?
        } else {
            std::fs::create_dir_all(dir)?;
            Index::create_in_dir(dir, fields.schema.clone())?
        };
        info!("Opened search index at {}", dir.display());
        Self::from_index(index, fields, writer_memory)
    }

    fn from_index(index: Index, fields: SchemaFields, writer_memory: usize) -> Result<Self> {
        let writer: IndexWriter = index.writer(writer_memory)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            reader,
            writer: Arc::new(Mutex::new(writer)),
            fields,
        })
    }

    fn build_document(&self, doc: &IndexDocument) -> Result<TantivyDocument> {
        let payload = serde_json::to_string(doc)?;
        let text = doc
            .fields
            .iter()
            .map(|(_, value)| value.to_search_text())
            .collect::<Vec<_>>()
            .join("\n");

        let mut tantivy_doc = doc!(
            self.fields.id => doc.unique_id(),
            self.fields.repository_id => doc.repository_id.as_str(),
            self.fields.object_id => doc.object_id.as_str(),
            self.fields.text => text,
            self.fields.payload => payload,
        );
        if let Some(mime) = &doc.mime_type {
            tantivy_doc.add_text(self.fields.mime_type, mime);
        }
        if let Some(parent) = doc.text_field("parent_id") {
            tantivy_doc.add_text(self.fields.parent_id, parent);
        }
        Ok(tantivy_doc)
    }

    fn id_term(&self, repository_id: &str, object_id: &str) -> Term {
        Term::from_field_text(self.fields.id, &unique_id(repository_id, object_id))
    }

    fn repository_query(&self, repository_id: &str) -> TermQuery {
        TermQuery::new(
            Term::from_field_text(self.fields.repository_id, repository_id),
            IndexRecordOption::Basic,
        )
    }

    fn decode(&self, doc: &TantivyDocument) -> Result<IndexDocument> {
        let payload = doc
            .get_first(self.fields.payload)
            .and_then(|v| v.as_str())
            .ok_or_else(|| StorageError::index("stored document has no payload"))?;
        Ok(serde_json::from_str(payload)?)
    }

    /// Run `stage` against the writer, then commit and reload the reader.
    async fn write<F>(&self, stage: F) -> Result<()>
    where
        F: FnOnce(&mut IndexWriter) -> Result<()> + Send + 'static,
    {
        let writer = Arc::clone(&self.writer);
        let reader = self.reader.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut writer = writer.lock();
            let committed = stage(&mut *writer).and_then(|_| {
                writer.commit()?;
                Ok(())
            });
            if let Err(err) = committed {
                if let Err(rollback) = writer.rollback() {
                    warn!(error = %rollback, "Index writer rollback failed");
                }
                return Err(err);
            }
            reader.reload()?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::index(format!("index writer task: {}", e)))?
    }
}

#[async_trait]
impl SearchIndexClient for TantivySearchIndex {
    async fn commit_batch(&self, operations: &[IndexOperation]) -> Result<BatchCommit> {
        let mut outcome = BatchCommit::default();
        let mut staged = Vec::with_capacity(operations.len());

        for (position, op) in operations.iter().enumerate() {
            let ids_ok = sanitize_id(op.repository_id()).and_then(|_| sanitize_id(op.object_id()));
            if let Err(err) = ids_ok {
                outcome.rejected.push(RejectedOperation {
                    position,
                    object_id: op.object_id().to_string(),
                    reason: err.to_string(),
                });
                continue;
            }
            match op {
                IndexOperation::Upsert(doc) => match self.build_document(doc) {
                    Ok(tantivy_doc) => staged.push(Staged::Upsert(
                        self.id_term(&doc.repository_id, &doc.object_id),
                        tantivy_doc,
                    )),
                    Err(err) => {
                        outcome.rejected.push(RejectedOperation {
                            position,
                            object_id: doc.object_id.clone(),
                            reason: err.to_string(),
                        });
                        continue;
                    }
                },
                IndexOperation::Remove {
                    repository_id,
                    object_id,
                } => staged.push(Staged::Remove(self.id_term(repository_id, object_id))),
            }
            outcome.committed += 1;
        }

        self.write(move |writer| {
            for op in staged {
                match op {
                    Staged::Upsert(id, doc) => {
                        writer.delete_term(id);
                        writer.add_document(doc)?;
                    }
                    Staged::Remove(id) => {
                        writer.delete_term(id);
                    }
                }
            }
            Ok(())
        })
        .await?;
        debug!(
            committed = outcome.committed,
            rejected = outcome.rejected.len(),
            "Committed index batch"
        );
        Ok(outcome)
    }

    async fn get_document(
        &self,
        repository_id: &str,
        object_id: &str,
    ) -> Result<Option<IndexDocument>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            self.id_term(repository_id, object_id),
            IndexRecordOption::Basic,
        );
        let hits = searcher.search(&query, &TopDocs::with_limit(1))?;
        match hits.first() {
            Some((_, address)) => {
                let doc: TantivyDocument = searcher.doc(*address)?;
                Ok(Some(self.decode(&doc)?))
            }
            None => Ok(None),
        }
    }

    async fn remove_repository(&self, repository_id: &str) -> Result<()> {
        let term = Term::from_field_text(self.fields.repository_id, repository_id);
        self.write(move |writer| {
            writer.delete_term(term);
            Ok(())
        })
        .await?;
        info!(repository_id, "Removed repository from search index");
        Ok(())
    }

    async fn document_count(&self, repository_id: &str) -> Result<u64> {
        let searcher = self.reader.searcher();
        let count = searcher.search(&self.repository_query(repository_id), &Count)?;
        Ok(count as u64)
    }

    async fn search(
        &self,
        repository_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<IndexDocument>> {
        let parser = QueryParser::for_index(&self.index, vec![self.fields.text]);
        let parsed = parser
            .parse_query(query)
            .map_err(|e| StorageError::rejected(format!("Invalid query '{}': {}", query, e)))?;
        let combined = BooleanQuery::new(vec![
            (Occur::Must, parsed),
            (
                Occur::Must,
                Box::new(self.repository_query(repository_id)) as Box<dyn Query>,
            ),
        ]);

        let searcher = self.reader.searcher();
        let hits = searcher.search(&combined, &TopDocs::with_limit(limit.max(1)))?;
        let mut docs = Vec::with_capacity(hits.len());
        for (_, address) in hits {
            let doc: TantivyDocument = searcher.doc(address)?;
            docs.push(self.decode(&doc)?);
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldValue;
    use tempfile::TempDir;

    fn doc(repo: &str, id: &str, name: &str) -> IndexDocument {
        let mut doc = IndexDocument::new(repo, id)
            .with_field("name", FieldValue::Text(name.into()))
            .with_field("parent_id", FieldValue::Text("root".into()));
        doc.mime_type = Some("text/plain".into());
        doc
    }

    #[tokio::test]
    async fn test_upsert_replaces_previous_version() {
        let index = TantivySearchIndex::in_ram().unwrap();
        index
            .commit_batch(&[IndexOperation::Upsert(doc("r", "a", "draft"))])
            .await
            .unwrap();
        index
            .commit_batch(&[IndexOperation::Upsert(doc("r", "a", "published"))])
            .await
            .unwrap();

        assert_eq!(index.document_count("r").await.unwrap(), 1);
        let stored = index.get_document("r", "a").await.unwrap().unwrap();
        assert_eq!(stored.text_field("name"), Some("published"));
    }

    #[tokio::test]
    async fn test_remove_and_repository_isolation() {
        let index = TantivySearchIndex::in_ram().unwrap();
        index
            .commit_batch(&[
                IndexOperation::Upsert(doc("r", "a", "alpha")),
                IndexOperation::Upsert(doc("r", "b", "beta")),
                IndexOperation::Upsert(doc("s", "a", "alpha")),
            ])
            .await
            .unwrap();
        index
            .commit_batch(&[IndexOperation::remove("r", "a")])
            .await
            .unwrap();

        assert!(index.get_document("r", "a").await.unwrap().is_none());
        assert!(index.get_document("s", "a").await.unwrap().is_some());
        assert_eq!(index.document_count("r").await.unwrap(), 1);

        index.remove_repository("r").await.unwrap();
        assert_eq!(index.document_count("r").await.unwrap(), 0);
        assert_eq!(index.document_count("s").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blank_ids_rejected_individually() {
        let index = TantivySearchIndex::in_ram().unwrap();
        let outcome = index
            .commit_batch(&[
                IndexOperation::Upsert(doc("r", " ", "blank")),
                IndexOperation::Upsert(doc("r", "ok", "fine")),
            ])
            .await
            .unwrap();
        assert_eq!(outcome.committed, 1);
        assert_eq!(outcome.rejected[0].position, 0);
        assert_eq!(index.document_count("r").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_leak_into_next_commit() {
        let index = TantivySearchIndex::in_ram().unwrap();
        let staged = index.build_document(&doc("r", "ghost", "staged")).unwrap();

        let err = index
            .write(move |writer| {
                writer.add_document(staged)?;
                Err(StorageError::index("staging failed"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Index);

        index
            .commit_batch(&[IndexOperation::Upsert(doc("r", "a", "real"))])
            .await
            .unwrap();
        assert!(index.get_document("r", "ghost").await.unwrap().is_none());
        assert_eq!(index.document_count("r").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_underscored_repository_ids_do_not_collide() {
        let index = TantivySearchIndex::in_ram().unwrap();
        index
            .commit_batch(&[
                IndexOperation::Upsert(doc("a_b", "c", "first")),
                IndexOperation::Upsert(doc("a", "b_c", "second")),
            ])
            .await
            .unwrap();
        index
            .commit_batch(&[IndexOperation::remove("a_b", "c")])
            .await
            .unwrap();

        assert!(index.get_document("a_b", "c").await.unwrap().is_none());
        let kept = index.get_document("a", "b_c").await.unwrap().unwrap();
        assert_eq!(kept.text_field("name"), Some("second"));
    }

    #[tokio::test]
    async fn test_search_within_repository() {
        let index = TantivySearchIndex::in_ram().unwrap();
        index
            .commit_batch(&[
                IndexOperation::Upsert(doc("r", "a", "quarterly report")),
                IndexOperation::Upsert(doc("r", "b", "meeting notes")),
                IndexOperation::Upsert(doc("s", "c", "quarterly plan")),
            ])
            .await
            .unwrap();

        let hits = index.search("r", "quarterly", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].object_id, "a");
    }

    #[tokio::test]
    async fn test_reopen_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let index = TantivySearchIndex::open_or_create(dir.path(), DEFAULT_WRITER_MEMORY).unwrap();
            index
                .commit_batch(&[IndexOperation::Upsert(doc("r", "a", "persisted"))])
                .await
                .unwrap();
        }
        let index = TantivySearchIndex::open_or_create(dir.path(), DEFAULT_WRITER_MEMORY).unwrap();
        assert_eq!(index.document_count("r").await.unwrap(), 1);
    }
}
