//! Per-object locking for concurrent content mutation

mod striped;

pub use striped::{
    BulkLockGuard, LockError, LockMode, LockRequest, LockResult, ObjectLockManager,
    DEFAULT_STRIPES,
};
