//! Striped read/write locks keyed by (repository, object)
//!
//! A fixed array of `parking_lot::RwLock<()>` is allocated once. A key maps
//! to a stripe through a deterministic `FxHasher`, so the same key always
//! lands on the same stripe and stripes are never created or destroyed.
//! Distinct keys may share a stripe; that only costs concurrency.
//!
//! Bulk requests are canonicalized first: keys are mapped to stripes,
//! duplicates collapse (a write request wins over a read on the same
//! stripe) and stripes are taken in ascending order. Two bulk requests can
//! therefore never deadlock against each other.
//!
//! The locks are not reentrant. A thread holding a stripe must not request
//! it again through a separate call.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHasher;
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Default stripe count.
pub const DEFAULT_STRIPES: usize = 4096;

/// How often a cancellable acquisition re-checks its token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock acquisition interrupted after {held} of {requested} stripes")]
    Interrupted { held: usize, requested: usize },

    #[error("Lock acquisition timed out after {0:?}")]
    TimedOut(Duration),
}

pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    Read,
    Write,
}

/// One entry of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockRequest {
    pub repository_id: String,
    pub object_id: String,
    pub mode: LockMode,
}

impl LockRequest {
    pub fn read(repository_id: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            object_id: object_id.into(),
            mode: LockMode::Read,
        }
    }

    pub fn write(repository_id: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            object_id: object_id.into(),
            mode: LockMode::Write,
        }
    }
}

enum StripeGuard<'a> {
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// Guard over every stripe of a bulk request.
///
/// Stripes are released in reverse acquisition order when the guard drops.
pub struct BulkLockGuard<'a> {
    guards: Vec<StripeGuard<'a>>,
}

impl<'a> BulkLockGuard<'a> {
    /// Number of distinct stripes held.
    pub fn stripe_count(&self) -> usize {
        self.guards.len()
    }
}

impl Drop for BulkLockGuard<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

impl std::fmt::Debug for BulkLockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkLockGuard")
            .field("stripes", &self.guards.len())
            .finish()
    }
}

/// Per-object lock manager.
pub struct ObjectLockManager {
    stripes: Box<[RwLock<()>]>,
}

impl Default for ObjectLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObjectLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectLockManager")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}

impl ObjectLockManager {
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    /// Create a manager with `stripes` stripes (at least one).
    ///
    /// More stripes reduce false sharing between unrelated objects at the
    /// cost of a few bytes each.
    pub fn with_stripes(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        let stripes = (0..stripes).map(|_| RwLock::new(())).collect::<Vec<_>>();
        Self {
            stripes: stripes.into_boxed_slice(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Stripe index for a key. Pure function of the key and stripe count.
    pub fn stripe_index(&self, repository_id: &str, object_id: &str) -> usize {
        let mut hasher = FxHasher::default();
        hasher.write(repository_id.as_bytes());
        hasher.write_u8(0xff);
        hasher.write(object_id.as_bytes());
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub fn acquire_read(&self, repository_id: &str, object_id: &str) -> RwLockReadGuard<'_, ()> {
        self.stripes[self.stripe_index(repository_id, object_id)].read()
    }

    pub fn acquire_write(&self, repository_id: &str, object_id: &str) -> RwLockWriteGuard<'_, ()> {
        self.stripes[self.stripe_index(repository_id, object_id)].write()
    }

    /// Read-lock every object of one repository.
    pub fn read_locks<S: AsRef<str>>(&self, repository_id: &str, objects: &[S]) -> BulkLockGuard<'_> {
        let requests = objects
            .iter()
            .map(|o| LockRequest::read(repository_id, o.as_ref()))
            .collect::<Vec<_>>();
        self.bulk_lock(&requests)
    }

    /// Acquire every requested lock, blocking until all are held.
    pub fn bulk_lock(&self, requests: &[LockRequest]) -> BulkLockGuard<'_> {
        let plan = self.canonicalize(requests);
        let mut guards = Vec::with_capacity(plan.len());
        for (stripe, mode) in plan {
            let lock = &self.stripes[stripe];
            guards.push(match mode {
                LockMode::Read => StripeGuard::Read(lock.read()),
                LockMode::Write => StripeGuard::Write(lock.write()),
            });
        }
        BulkLockGuard { guards }
    }

    /// Like [`bulk_lock`](Self::bulk_lock) but aborts when `cancel` fires.
    ///
    /// On cancellation every stripe already taken is released before
    /// returning [`LockError::Interrupted`].
    pub fn bulk_lock_cancellable(
        &self,
        requests: &[LockRequest],
        cancel: &CancellationToken,
    ) -> LockResult<BulkLockGuard<'_>> {
        self.bulk_lock_until(requests, || cancel.is_cancelled(), None)
    }

    /// Bounded-wait bulk acquisition. Partial locks are released on timeout.
    pub fn bulk_lock_timeout(
        &self,
        requests: &[LockRequest],
        timeout: Duration,
    ) -> LockResult<BulkLockGuard<'_>> {
        self.bulk_lock_until(requests, || false, Some(Instant::now() + timeout))
            .map_err(|err| match err {
                LockError::Interrupted { .. } => LockError::TimedOut(timeout),
                other => other,
            })
    }

    /// Release a bulk guard explicitly.
    pub fn bulk_unlock(&self, guard: BulkLockGuard<'_>) {
        drop(guard);
    }

    fn bulk_lock_until(
        &self,
        requests: &[LockRequest],
        interrupted: impl Fn() -> bool,
        deadline: Option<Instant>,
    ) -> LockResult<BulkLockGuard<'_>> {
        let plan = self.canonicalize(requests);
        let requested = plan.len();
        // Dropping `held` on the error path releases partial acquisitions.
        let mut held = BulkLockGuard {
            guards: Vec::with_capacity(requested),
        };

        for (stripe, mode) in plan {
            let lock = &self.stripes[stripe];
            let guard = loop {
                if interrupted() || deadline.is_some_and(|d| Instant::now() >= d) {
                    return Err(LockError::Interrupted {
                        held: held.guards.len(),
                        requested,
                    });
                }
                let attempt = match mode {
                    LockMode::Read => lock.try_read_for(CANCEL_POLL_INTERVAL).map(StripeGuard::Read),
                    LockMode::Write => lock
                        .try_write_for(CANCEL_POLL_INTERVAL)
                        .map(StripeGuard::Write),
                };
                if let Some(guard) = attempt {
                    break guard;
                }
            };
            held.guards.push(guard);
        }
        Ok(held)
    }

    /// Stripe plan in ascending stripe order, write winning over read.
    fn canonicalize(&self, requests: &[LockRequest]) -> Vec<(usize, LockMode)> {
        let mut plan: BTreeMap<usize, LockMode> = BTreeMap::new();
        for request in requests {
            let stripe = self.stripe_index(&request.repository_id, &request.object_id);
            let entry = plan.entry(stripe).or_insert(request.mode);
            if request.mode == LockMode::Write {
                *entry = LockMode::Write;
            }
        }
        plan.into_iter().collect()
    }
}
