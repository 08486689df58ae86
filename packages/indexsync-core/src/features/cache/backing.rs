//! Shared key/value backend behind the layered cache
//!
//! [`KeyValueCache`] is the seam for the cluster-visible map. Values cross
//! it as opaque bytes so any remote store can implement it. The in-process
//! implementation keeps one moka cache per (repository, region).

use dashmap::DashMap;
use moka::sync::Cache;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::CacheResult;
use super::types::{CacheRegion, RegionId, RegionSpec, RegionStats};

/// Byte-oriented region store.
///
/// Implementations must be safe for concurrent use without caller locking.
/// Entries must not be served after their region TTL elapses; a distributed
/// store may lag by its clock-skew margin.
pub trait KeyValueCache: Send + Sync {
    fn get(&self, region: &RegionId, key: &str) -> CacheResult<Option<Arc<[u8]>>>;

    fn put(&self, region: &RegionId, key: &str, value: Arc<[u8]>) -> CacheResult<()>;

    fn remove(&self, region: &RegionId, key: &str) -> CacheResult<()>;

    fn remove_all(&self, region: &RegionId) -> CacheResult<()>;

    fn stats(&self, region: &RegionId) -> CacheResult<RegionStats>;

    /// Short backend name for log lines
    fn backend_name(&self) -> &'static str;
}

/// In-process backend: one moka cache (capacity + TTL) per region.
pub struct MokaKeyValueCache {
    specs: BTreeMap<CacheRegion, RegionSpec>,
    regions: DashMap<RegionId, Cache<String, Arc<[u8]>>>,
}

impl MokaKeyValueCache {
    /// Regions missing from `specs` use [`RegionSpec::default`].
    pub fn new(specs: impl IntoIterator<Item = (CacheRegion, RegionSpec)>) -> Self {
        Self {
            specs: specs.into_iter().collect(),
            regions: DashMap::new(),
        }
    }

    fn spec(&self, region: CacheRegion) -> RegionSpec {
        self.specs.get(&region).copied().unwrap_or_default()
    }

    fn existing(&self, id: &RegionId) -> Option<Cache<String, Arc<[u8]>>> {
        self.regions.get(id).map(|entry| entry.value().clone())
    }

    fn region(&self, id: &RegionId) -> Cache<String, Arc<[u8]>> {
        if let Some(cache) = self.existing(id) {
            return cache;
        }
        let spec = self.spec(id.region);
        let label = id.to_string();
        self.regions
            .entry(id.clone())
            .or_insert_with(|| build_region(spec, label))
            .value()
            .clone()
    }
}

fn build_region(spec: RegionSpec, label: String) -> Cache<String, Arc<[u8]>> {
    let mut builder = Cache::<String, Arc<[u8]>>::builder()
        .max_capacity(spec.capacity)
        .eviction_listener(move |key, _value, cause| {
            tracing::debug!("Cache {} evicted: {} (cause: {:?})", label, key, cause);
        });
    if let Some(ttl) = spec.ttl {
        builder = builder.time_to_live(ttl);
    }
    builder.build()
}

impl KeyValueCache for MokaKeyValueCache {
    fn get(&self, region: &RegionId, key: &str) -> CacheResult<Option<Arc<[u8]>>> {
        Ok(self.existing(region).and_then(|cache| cache.get(key)))
    }

    fn put(&self, region: &RegionId, key: &str, value: Arc<[u8]>) -> CacheResult<()> {
        self.region(region).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, region: &RegionId, key: &str) -> CacheResult<()> {
        if let Some(cache) = self.existing(region) {
            cache.invalidate(key);
        }
        Ok(())
    }

    fn remove_all(&self, region: &RegionId) -> CacheResult<()> {
        if let Some(cache) = self.existing(region) {
            cache.invalidate_all();
            cache.run_pending_tasks();
        }
        Ok(())
    }

    fn stats(&self, region: &RegionId) -> CacheResult<RegionStats> {
        let Some(cache) = self.existing(region) else {
            return Ok(RegionStats::default());
        };
        cache.run_pending_tasks();
        let approx_bytes = cache
            .iter()
            .map(|(key, value)| (key.len() + value.len()) as u64)
            .sum();
        Ok(RegionStats {
            entries: cache.entry_count(),
            approx_bytes,
        })
    }

    fn backend_name(&self) -> &'static str {
        "moka"
    }
}
