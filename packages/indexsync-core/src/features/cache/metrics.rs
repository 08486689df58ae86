//! Prometheus metrics for the layered cache

use prometheus::{register_int_counter_vec_with_registry, IntCounterVec, Opts, Registry};

use super::error::CacheResult;
use super::types::CacheRegion;

/// Hit/miss/degradation counters labelled by repository and region.
#[derive(Clone)]
pub struct CacheMetrics {
    pub hits: IntCounterVec,
    pub misses: IntCounterVec,
    pub degraded: IntCounterVec,
}

impl CacheMetrics {
    pub fn new(registry: &Registry) -> CacheResult<Self> {
        let labels = &["repository", "region"];
        Ok(Self {
            hits: register_int_counter_vec_with_registry!(
                Opts::new("indexsync_cache_hits_total", "Region cache hits"),
                labels,
                registry
            )?,
            misses: register_int_counter_vec_with_registry!(
                Opts::new("indexsync_cache_misses_total", "Region cache misses"),
                labels,
                registry
            )?,
            degraded: register_int_counter_vec_with_registry!(
                Opts::new(
                    "indexsync_cache_degraded_total",
                    "Operations passed through because the backend was unavailable"
                ),
                labels,
                registry
            )?,
        })
    }

    pub fn record_hit(&self, repository_id: &str, region: CacheRegion) {
        self.hits
            .with_label_values(&[repository_id, region.as_str()])
            .inc();
    }

    pub fn record_miss(&self, repository_id: &str, region: CacheRegion) {
        self.misses
            .with_label_values(&[repository_id, region.as_str()])
            .inc();
    }

    pub fn record_degraded(&self, repository_id: &str, region: CacheRegion) {
        self.degraded
            .with_label_values(&[repository_id, region.as_str()])
            .inc();
    }

    pub fn hit_rate(&self, repository_id: &str, region: CacheRegion) -> f64 {
        let labels = [repository_id, region.as_str()];
        let hits = self.hits.with_label_values(&labels).get() as f64;
        let total = hits + self.misses.with_label_values(&labels).get() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}
