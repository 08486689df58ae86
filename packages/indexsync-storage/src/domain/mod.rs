//! Domain layer: change-feed model, index documents and port traits
//!
//! # Domain Models
//!
//! - `ChangeCursor`: last sequence of a repository's feed that is fully indexed
//! - `ChangeEvent`: one entry of the change feed
//! - `IndexDocument` / `IndexOperation`: what gets sent to the search engine
//! - `AuthToken`: short-lived bearer token of the content service
//!
//! # Port Traits
//!
//! - `ChangeFeedSource`: pull API over the ordered change feed
//! - `ContentSource`: current state of objects
//! - `SearchIndexClient`: batched writes and lookups against the index
//! - `CursorStore`: durable cursor per repository

mod content;

pub use content::{BaseType, ContentObject, PropertyValue};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::Result;

// ═══════════════════════════════════════════════════════════════════════════
// Change Feed
// ═══════════════════════════════════════════════════════════════════════════

/// Tracking position of one repository.
///
/// Non-decreasing, except for an explicit reset to 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCursor {
    pub repository_id: String,
    pub sequence: u64,
    pub updated_at: DateTime<Utc>,
}

impl ChangeCursor {
    pub fn new(repository_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            repository_id: repository_id.into(),
            sequence,
            updated_at: Utc::now(),
        }
    }

    /// Cursor before the first event.
    pub fn initial(repository_id: impl Into<String>) -> Self {
        Self::new(repository_id, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
    SecurityChanged,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
            ChangeType::SecurityChanged => "security_changed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ChangeType::Created),
            "updated" => Some(ChangeType::Updated),
            "deleted" => Some(ChangeType::Deleted),
            "security_changed" | "security" => Some(ChangeType::SecurityChanged),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change of one object. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub object_id: String,
    pub repository_id: String,
    pub change_type: ChangeType,
    pub sequence: u64,
    /// Known when the feed carries it; otherwise taken from the fetched object
    pub mime_type: Option<String>,
}

impl ChangeEvent {
    pub fn new(
        repository_id: impl Into<String>,
        object_id: impl Into<String>,
        change_type: ChangeType,
        sequence: u64,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            repository_id: repository_id.into(),
            change_type,
            sequence,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Map a raw feed row. Without an explicit change type a live row is an update.
    pub fn from_feed_entry(repository_id: impl Into<String>, entry: FeedEntry) -> Self {
        let change_type = if entry.deleted {
            ChangeType::Deleted
        } else {
            entry
                .change_type
                .as_deref()
                .and_then(ChangeType::from_str)
                .unwrap_or(ChangeType::Updated)
        };
        Self {
            object_id: entry.doc_id,
            repository_id: repository_id.into(),
            change_type,
            sequence: entry.sequence,
            mime_type: entry.mime_type,
        }
    }
}

/// Row of the document store's change-feed pull API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub doc_id: String,
    pub sequence: u64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub change_type: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Index Documents
// ═══════════════════════════════════════════════════════════════════════════

/// Typed field value of an index document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    TextList(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Flattened text used by substring search.
    pub fn to_search_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Decimal(d) => d.to_string(),
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::DateTime(dt) => dt.to_rfc3339(),
            FieldValue::TextList(items) => items.join(" "),
        }
    }
}

/// Searchable projection of a content object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub object_id: String,
    pub repository_id: String,
    /// Ordered (name, value) pairs
    pub fields: Vec<(String, FieldValue)>,
    pub mime_type: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

impl IndexDocument {
    pub fn new(repository_id: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            repository_id: repository_id.into(),
            fields: Vec::new(),
            mime_type: None,
            indexed_at: Utc::now(),
        }
    }

    /// Index-wide unique key.
    pub fn unique_id(&self) -> String {
        unique_id(&self.repository_id, &self.object_id)
    }

    pub fn push_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push((name.into(), value));
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.push_field(name, value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn text_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_text)
    }
}

/// `{repository}_{object}`, the primary key in the search index.
///
/// `_` and `\` inside the repository id are backslash-escaped, so the first
/// bare `_` always ends the repository part and no two pairs share a key.
pub fn unique_id(repository_id: &str, object_id: &str) -> String {
    let mut id = String::with_capacity(repository_id.len() + object_id.len() + 1);
    for ch in repository_id.chars() {
        if ch == '_' || ch == '\\' {
            id.push('\\');
        }
        id.push(ch);
    }
    id.push('_');
    id.push_str(object_id);
    id
}

/// One write against the search index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOperation {
    Upsert(IndexDocument),
    Remove {
        repository_id: String,
        object_id: String,
    },
}

impl IndexOperation {
    pub fn remove(repository_id: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self::Remove {
            repository_id: repository_id.into(),
            object_id: object_id.into(),
        }
    }

    pub fn object_id(&self) -> &str {
        match self {
            IndexOperation::Upsert(doc) => &doc.object_id,
            IndexOperation::Remove { object_id, .. } => object_id,
        }
    }

    pub fn repository_id(&self) -> &str {
        match self {
            IndexOperation::Upsert(doc) => &doc.repository_id,
            IndexOperation::Remove { repository_id, .. } => repository_id,
        }
    }
}

/// Operation refused by the engine while the rest of its batch committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedOperation {
    /// Position in the submitted batch
    pub position: usize,
    pub object_id: String,
    pub reason: String,
}

/// Outcome of a batch that the engine accepted as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchCommit {
    pub committed: usize,
    pub rejected: Vec<RejectedOperation>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Authentication
// ═══════════════════════════════════════════════════════════════════════════

/// Bearer token registered for (repository, user).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub repository_id: String,
    pub username: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// Usable at `now` with at least `margin` left before expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        now + margin < self.expires_at
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("repository_id", &self.repository_id)
            .field("username", &self.username)
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Traits
// ═══════════════════════════════════════════════════════════════════════════

/// Ordered change feed of the document store.
#[async_trait]
pub trait ChangeFeedSource: Send + Sync {
    /// Up to `limit` events with `sequence > since`, ascending.
    async fn changes_since(
        &self,
        repository_id: &str,
        since: u64,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>>;

    /// Highest sequence emitted so far (0 for an empty feed).
    async fn latest_sequence(&self, repository_id: &str) -> Result<u64>;
}

/// Read access to current object state.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// `Ok(None)` when the object no longer exists.
    async fn fetch_object(
        &self,
        repository_id: &str,
        object_id: &str,
    ) -> Result<Option<ContentObject>>;

    /// Stable-ordered page of every object id in the repository.
    async fn list_object_ids(
        &self,
        repository_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>>;
}

/// Search engine client.
#[async_trait]
pub trait SearchIndexClient: Send + Sync {
    /// Apply and commit a batch.
    ///
    /// `Err` means nothing in the batch is known to be committed. Individual
    /// refusals are reported in [`BatchCommit::rejected`].
    async fn commit_batch(&self, operations: &[IndexOperation]) -> Result<BatchCommit>;

    async fn get_document(
        &self,
        repository_id: &str,
        object_id: &str,
    ) -> Result<Option<IndexDocument>>;

    /// Remove every document of a repository.
    async fn remove_repository(&self, repository_id: &str) -> Result<()>;

    async fn document_count(&self, repository_id: &str) -> Result<u64>;

    /// Full-text query in the engine's syntax. Callers embedding user input
    /// must escape it first.
    async fn search(
        &self,
        repository_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<IndexDocument>>;
}

/// Durable cursor storage.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, repository_id: &str) -> Result<Option<ChangeCursor>>;

    async fn store(&self, cursor: &ChangeCursor) -> Result<()>;

    async fn list(&self) -> Result<Vec<ChangeCursor>>;
}
