//! Per-repository, per-region typed cache facade
//!
//! Wraps a [`KeyValueCache`] backend with three behaviours:
//! - disabled globally or per region: every call is a transparent no-op/miss;
//! - backend unavailable: the call degrades to pass-through with a warning;
//! - values are bincode-encoded, a value that fails to decode is dropped.
//!
//! Staleness is bounded by region TTL only. Writers that change an object
//! invalidate its entries; a reader that fetched before the invalidation may
//! still `put` the older value, which then lives until its TTL elapses.

use dashmap::DashMap;
use prometheus::Registry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::backing::{KeyValueCache, MokaKeyValueCache};
use super::error::{CacheError, CacheResult};
use super::metrics::CacheMetrics;
use super::types::{CacheRegion, RegionId, RegionSpec, RegionStats};
use crate::config::CacheConfig;

/// Process-wide entry point: hands out one [`LayeredCache`] per repository.
pub struct CacheService {
    specs: Arc<BTreeMap<CacheRegion, RegionSpec>>,
    backend: Option<Arc<dyn KeyValueCache>>,
    metrics: Option<Arc<CacheMetrics>>,
    repositories: DashMap<String, Arc<LayeredCache>>,
}

impl CacheService {
    /// Build the service with the in-process moka backend.
    pub fn new(config: &CacheConfig) -> Self {
        let specs = enabled_specs(config);
        let backend = MokaKeyValueCache::new(specs.iter().map(|(r, s)| (*r, *s)));
        Self::with_backend(config, Arc::new(backend))
    }

    pub fn with_backend(config: &CacheConfig, backend: Arc<dyn KeyValueCache>) -> Self {
        Self {
            specs: Arc::new(enabled_specs(config)),
            backend: config.enabled.then_some(backend),
            metrics: None,
            repositories: DashMap::new(),
        }
    }

    /// A service that caches nothing.
    pub fn disabled() -> Self {
        Self {
            specs: Arc::new(BTreeMap::new()),
            backend: None,
            metrics: None,
            repositories: DashMap::new(),
        }
    }

    /// Register hit/miss counters. Call before handing out repository caches.
    pub fn with_metrics(mut self, registry: &Registry) -> CacheResult<Self> {
        self.metrics = Some(Arc::new(CacheMetrics::new(registry)?));
        Ok(self)
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn for_repository(&self, repository_id: &str) -> Arc<LayeredCache> {
        if let Some(existing) = self.repositories.get(repository_id) {
            return Arc::clone(existing.value());
        }
        let cache = Arc::new(LayeredCache {
            repository_id: repository_id.to_string(),
            specs: Arc::clone(&self.specs),
            backend: self.backend.clone(),
            metrics: self.metrics.clone(),
        });
        Arc::clone(
            self.repositories
                .entry(repository_id.to_string())
                .or_insert(cache)
                .value(),
        )
    }

    /// Statistics of every repository handed out so far, one line each.
    pub fn stats(&self) -> String {
        let mut repos = self
            .repositories
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect::<Vec<_>>();
        repos.sort_by(|a, b| a.repository_id.cmp(&b.repository_id));
        repos
            .iter()
            .map(|cache| cache.stats())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn enabled_specs(config: &CacheConfig) -> BTreeMap<CacheRegion, RegionSpec> {
    CacheRegion::ALL
        .iter()
        .filter_map(|region| config.region_spec(*region).map(|spec| (*region, spec)))
        .collect()
}

/// All regions of one repository.
pub struct LayeredCache {
    repository_id: String,
    specs: Arc<BTreeMap<CacheRegion, RegionSpec>>,
    backend: Option<Arc<dyn KeyValueCache>>,
    metrics: Option<Arc<CacheMetrics>>,
}

impl LayeredCache {
    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }

    pub fn region(&self, region: CacheRegion) -> RegionCache<'_> {
        let backend = match (&self.backend, self.specs.get(&region)) {
            (Some(backend), Some(spec)) => Some((backend.as_ref(), *spec)),
            _ => None,
        };
        RegionCache {
            owner: self,
            id: RegionId::new(self.repository_id.as_str(), region),
            backend,
        }
    }

    /// Drop every cached view of one object.
    pub fn invalidate_object(&self, object_id: &str) {
        for region in [
            CacheRegion::Node,
            CacheRegion::Document,
            CacheRegion::Folder,
            CacheRegion::Attachment,
        ] {
            self.region(region).remove(object_id);
        }
    }

    /// Drop the cached children listing of a folder.
    pub fn invalidate_tree(&self, parent_id: &str) {
        self.region(CacheRegion::Tree).remove(parent_id);
    }

    /// One line with every region's statistics.
    pub fn stats(&self) -> String {
        let regions = CacheRegion::ALL
            .iter()
            .map(|region| self.region(*region).stats())
            .collect::<Vec<_>>();
        format!("repository={} {}", self.repository_id, regions.join(" "))
    }
}

/// Typed view of a single region.
pub struct RegionCache<'a> {
    owner: &'a LayeredCache,
    id: RegionId,
    backend: Option<(&'a dyn KeyValueCache, RegionSpec)>,
}

impl RegionCache<'_> {
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (backend, _) = self.backend?;
        let bytes = match backend.get(&self.id, key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.record(|m, r, g| m.record_miss(r, g));
                return None;
            }
            Err(err) => {
                self.degrade("get", key, &err);
                return None;
            }
        };
        match bincode::deserialize::<T>(&bytes) {
            Ok(value) => {
                self.record(|m, r, g| m.record_hit(r, g));
                Some(value)
            }
            Err(err) => {
                warn!(
                    repository_id = %self.id.repository_id,
                    region = %self.id.region,
                    key,
                    "Dropping undecodable cache entry: {}",
                    err
                );
                self.remove(key);
                self.record(|m, r, g| m.record_miss(r, g));
                None
            }
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) {
        let Some((backend, _)) = self.backend else {
            return;
        };
        let bytes: Arc<[u8]> = match bincode::serialize(value) {
            Ok(bytes) => bytes.into(),
            Err(err) => {
                self.degrade("put", key, &CacheError::from(err));
                return;
            }
        };
        if let Err(err) = backend.put(&self.id, key, bytes) {
            self.degrade("put", key, &err);
        }
    }

    pub fn remove(&self, key: &str) {
        if let Some((backend, _)) = self.backend {
            if let Err(err) = backend.remove(&self.id, key) {
                self.degrade("remove", key, &err);
            }
        }
    }

    pub fn remove_all(&self) {
        if let Some((backend, _)) = self.backend {
            if let Err(err) = backend.remove_all(&self.id) {
                self.degrade("remove_all", "*", &err);
            }
        }
    }

    /// Raw statistics, `None` when the region is disabled or unreachable.
    pub fn region_stats(&self) -> Option<RegionStats> {
        let (backend, _) = self.backend?;
        match backend.stats(&self.id) {
            Ok(stats) => Some(stats),
            Err(err) => {
                self.degrade("stats", "*", &err);
                None
            }
        }
    }

    /// Human-readable statistics, e.g. `node[entries=3 bytes=120 capacity=1000 ttl=300s]`.
    pub fn stats(&self) -> String {
        let region = self.id.region;
        let Some((_, spec)) = self.backend else {
            return format!("{}[disabled]", region);
        };
        let ttl = spec
            .ttl
            .map(|ttl| format!("{}s", ttl.as_secs()))
            .unwrap_or_else(|| "eternal".to_string());
        match self.region_stats() {
            Some(stats) => format!(
                "{}[entries={} bytes={} capacity={} ttl={}]",
                region, stats.entries, stats.approx_bytes, spec.capacity, ttl
            ),
            None => format!("{}[unavailable]", region),
        }
    }

    fn record(&self, f: impl FnOnce(&CacheMetrics, &str, CacheRegion)) {
        if let Some(metrics) = &self.owner.metrics {
            f(metrics, &self.id.repository_id, self.id.region);
        }
    }

    fn degrade(&self, op: &str, key: &str, err: &CacheError) {
        match err {
            CacheError::Unavailable(_) => warn!(
                repository_id = %self.id.repository_id,
                region = %self.id.region,
                key,
                "Cache {} passed through: {}",
                op,
                err
            ),
            _ => debug!(
                repository_id = %self.id.repository_id,
                region = %self.id.region,
                key,
                "Cache {} failed: {}",
                op,
                err
            ),
        }
        self.record(|m, r, g| m.record_degraded(r, g));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, RegionSettings};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Node {
        id: String,
        name: String,
        parent: Option<String>,
    }

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            name: format!("{}.txt", id),
            parent: Some("root".to_string()),
        }
    }

    /// Backend that always fails, as an unreachable remote store would.
    struct UnreachableBackend;

    impl KeyValueCache for UnreachableBackend {
        fn get(&self, _: &RegionId, _: &str) -> CacheResult<Option<Arc<[u8]>>> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        fn put(&self, _: &RegionId, _: &str, _: Arc<[u8]>) -> CacheResult<()> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        fn remove(&self, _: &RegionId, _: &str) -> CacheResult<()> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        fn remove_all(&self, _: &RegionId) -> CacheResult<()> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        fn stats(&self, _: &RegionId) -> CacheResult<RegionStats> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        fn backend_name(&self) -> &'static str {
            "unreachable"
        }
    }

    #[test]
    fn test_typed_get_put_remove() {
        let service = CacheService::new(&CacheConfig::default());
        let cache = service.for_repository("repo");
        let nodes = cache.region(CacheRegion::Node);

        assert_eq!(nodes.get::<Node>("a"), None);
        nodes.put("a", &node("a"));
        assert_eq!(nodes.get::<Node>("a"), Some(node("a")));

        nodes.remove("a");
        assert_eq!(nodes.get::<Node>("a"), None);
    }

    #[test]
    fn test_remove_all_only_touches_one_region() {
        let service = CacheService::new(&CacheConfig::default());
        let cache = service.for_repository("repo");
        cache.region(CacheRegion::Node).put("a", &node("a"));
        cache.region(CacheRegion::Tree).put("root", &vec!["a".to_string()]);

        cache.region(CacheRegion::Node).remove_all();
        assert_eq!(cache.region(CacheRegion::Node).get::<Node>("a"), None);
        assert_eq!(
            cache.region(CacheRegion::Tree).get::<Vec<String>>("root"),
            Some(vec!["a".to_string()])
        );
    }

    #[test]
    fn test_repositories_do_not_share_entries() {
        let service = CacheService::new(&CacheConfig::default());
        service
            .for_repository("r1")
            .region(CacheRegion::Node)
            .put("a", &node("a"));
        assert_eq!(
            service
                .for_repository("r2")
                .region(CacheRegion::Node)
                .get::<Node>("a"),
            None
        );
        assert!(Arc::ptr_eq(
            &service.for_repository("r1"),
            &service.for_repository("r1")
        ));
    }

    #[test]
    fn test_disabled_cache_is_noop() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let service = CacheService::new(&config);
        assert!(!service.is_enabled());
        let cache = service.for_repository("repo");
        let nodes = cache.region(CacheRegion::Node);
        nodes.put("a", &node("a"));
        assert_eq!(nodes.get::<Node>("a"), None);
        nodes.remove("a");
        nodes.remove_all();
        assert_eq!(nodes.stats(), "node[disabled]");
    }

    #[test]
    fn test_disabled_region_is_noop() {
        let mut config = CacheConfig::default();
        config.regions.insert(
            CacheRegion::LatestChange,
            RegionSettings {
                enabled: Some(false),
                ..RegionSettings::default()
            },
        );
        let service = CacheService::new(&config);
        let cache = service.for_repository("repo");
        cache.region(CacheRegion::LatestChange).put("latest", &5u64);
        assert_eq!(cache.region(CacheRegion::LatestChange).get::<u64>("latest"), None);

        cache.region(CacheRegion::Node).put("a", &node("a"));
        assert!(cache.region(CacheRegion::Node).get::<Node>("a").is_some());
    }

    #[test]
    fn test_unavailable_backend_degrades() {
        let registry = Registry::new();
        let service = CacheService::with_backend(&CacheConfig::default(), Arc::new(UnreachableBackend))
            .with_metrics(&registry)
            .unwrap();
        let cache = service.for_repository("repo");
        let nodes = cache.region(CacheRegion::Node);

        nodes.put("a", &node("a"));
        assert_eq!(nodes.get::<Node>("a"), None);
        cache.invalidate_object("a");
        assert_eq!(nodes.stats(), "node[unavailable]");

        let degraded = service
            .metrics
            .as_ref()
            .unwrap()
            .degraded
            .with_label_values(&["repo", "node"])
            .get();
        assert!(degraded >= 3);
    }

    #[test]
    fn test_undecodable_entry_is_dropped() {
        let service = CacheService::new(&CacheConfig::default());
        let nodes = service.for_repository("repo");
        let nodes = nodes.region(CacheRegion::Node);
        nodes.put("a", &1u8);
        assert_eq!(nodes.get::<Node>("a"), None);
        assert_eq!(nodes.get::<u8>("a"), None);
    }

    #[test]
    fn test_invalidate_object_and_tree() {
        let service = CacheService::new(&CacheConfig::default());
        let cache = service.for_repository("repo");
        cache.region(CacheRegion::Node).put("a", &node("a"));
        cache.region(CacheRegion::Document).put("a", &node("a"));
        cache.region(CacheRegion::Tree).put("root", &vec!["a".to_string()]);

        cache.invalidate_object("a");
        assert_eq!(cache.region(CacheRegion::Node).get::<Node>("a"), None);
        assert_eq!(cache.region(CacheRegion::Document).get::<Node>("a"), None);
        assert!(cache.region(CacheRegion::Tree).get::<Vec<String>>("root").is_some());

        cache.invalidate_tree("root");
        assert_eq!(cache.region(CacheRegion::Tree).get::<Vec<String>>("root"), None);
    }

    #[test]
    fn test_ttl_window() {
        let mut config = CacheConfig::default();
        config.regions.insert(
            CacheRegion::Node,
            RegionSettings {
                enabled: None,
                capacity: Some(100),
                ttl_seconds: Some(1),
            },
        );
        let service = CacheService::new(&config);
        let cache = service.for_repository("repo");
        let nodes = cache.region(CacheRegion::Node);
        nodes.put("a", &node("a"));

        std::thread::sleep(Duration::from_millis(500));
        assert!(nodes.get::<Node>("a").is_some());
        std::thread::sleep(Duration::from_millis(700));
        assert_eq!(nodes.get::<Node>("a"), None);
    }

    #[test]
    fn test_stats_string() {
        let service = CacheService::new(&CacheConfig::default());
        let cache = service.for_repository("repo");
        cache.region(CacheRegion::Node).put("a", &node("a"));

        let line = cache.region(CacheRegion::Node).stats();
        assert!(line.starts_with("node[entries=1 bytes="), "{}", line);
        assert!(service.stats().starts_with("repository=repo node[entries=1"));
    }

    #[test]
    fn test_concurrent_access() {
        let service = Arc::new(CacheService::new(&CacheConfig::default()));
        let handles = (0..8)
            .map(|t| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    let cache = service.for_repository("repo");
                    for i in 0..200 {
                        let key = format!("{}-{}", t, i % 20);
                        cache.region(CacheRegion::Node).put(&key, &node(&key));
                        let _ = cache.region(CacheRegion::Node).get::<Node>(&key);
                        if i % 7 == 0 {
                            cache.invalidate_object(&key);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
