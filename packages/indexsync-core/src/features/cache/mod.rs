//! Layered region cache and request-scoped memoization
//!
//! - **Layered cache**: named regions per repository, each with capacity and
//!   TTL, over a pluggable [`KeyValueCache`] backend (moka in-process).
//! - **Request cache**: per-request memo carried by an explicit
//!   [`RequestContext`].

mod backing;
mod error;
mod layered_cache;
mod metrics;
mod request_cache;
mod types;

pub use backing::{KeyValueCache, MokaKeyValueCache};
pub use error::{CacheError, CacheResult};
pub use layered_cache::{CacheService, LayeredCache, RegionCache};
pub use metrics::CacheMetrics;
pub use request_cache::{RequestContext, RequestScopedCache, LATEST_CHANGE_KEY};
pub use types::{CacheRegion, RegionId, RegionSpec, RegionStats};
