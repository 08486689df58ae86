//! Feature modules
//!
//! - cache/   : layered region cache + request-scoped memo
//! - locking/ : striped per-object read/write locks
//! - query/   : query-string escaping

pub mod cache;
pub mod locking;
pub mod query;
