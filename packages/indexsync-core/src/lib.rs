/*
 * indexsync core - building blocks shared by the content service and the indexer
 *
 * - config/   : YAML v1 startup configuration
 * - features/ : cache, locking, query sanitizing
 *
 * Nothing in this crate performs network or disk I/O except config loading.
 */

pub mod config;
pub mod features;

pub use config::{ConfigError, SyncConfig};
pub use features::cache::{CacheRegion, CacheService, LayeredCache, RequestContext};
pub use features::locking::{LockError, ObjectLockManager};
pub use features::query::{escape, escape_and_quote, sanitize_id, SanitizeError};
