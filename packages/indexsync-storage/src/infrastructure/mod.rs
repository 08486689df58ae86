//! Infrastructure layer - storage adapters
//!
//! In-memory adapters, the SQLite cursor store and the Tantivy index.

pub mod memory;
pub mod repository;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "tantivy")]
pub mod tantivy_index;

pub use memory::{InMemoryCursorStore, InMemorySearchIndex};
pub use repository::InMemoryRepository;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCursorStore;

#[cfg(feature = "tantivy")]
pub use tantivy_index::TantivySearchIndex;
