//! Storage for the index synchronizer
//!
//! ## Layout
//!
//! - `domain`: change feed, content objects, index documents and the port
//!   traits the orchestrator drives
//! - `infrastructure`: adapters implementing those ports
//!
//! ## Usage
//!
//! ```rust,ignore
//! use indexsync_storage::{IndexOperation, InMemorySearchIndex, SearchIndexClient};
//!
//! let index = InMemorySearchIndex::new();
//! index.commit_batch(&[IndexOperation::remove("repo", "obj")]).await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    unique_id, AuthToken, BaseType, BatchCommit, ChangeCursor, ChangeEvent, ChangeFeedSource,
    ChangeType, ContentObject, ContentSource, CursorStore, FeedEntry, FieldValue, IndexDocument,
    IndexOperation, PropertyValue, RejectedOperation, SearchIndexClient,
};
pub use infrastructure::{InMemoryCursorStore, InMemoryRepository, InMemorySearchIndex};

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteCursorStore;

#[cfg(feature = "tantivy")]
pub use infrastructure::TantivySearchIndex;
