//! Startup configuration (YAML schema v1)
//!
//! ```yaml
//! version: 1
//! content_service:
//!   base_url: http://localhost:8080/core/rest
//!   app: indexsync
//! repositories:
//!   - id: bedroom
//!     username: admin
//!     password: admin
//! tracking:
//!   mime_types: "text/plain,application/pdf"
//!   batch_size: 100
//! locks:
//!   stripes: 4096
//! cache:
//!   enabled: true
//!   default: { capacity: 10000, ttl_seconds: 300 }
//!   regions:
//!     latest_change: { enabled: false }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{ConfigError, ConfigResult};
use super::validation::Validatable;
use crate::features::cache::{CacheRegion, RegionSpec};

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Complete startup configuration, built once and passed to constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Schema version. Missing deserializes to 0 and is rejected.
    #[serde(default)]
    pub version: u32,

    #[serde(default)]
    pub content_service: ContentServiceConfig,

    #[serde(default)]
    pub repositories: Vec<RepositoryCredentials>,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub index: IndexConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            version: 1,
            content_service: ContentServiceConfig::default(),
            repositories: Vec::new(),
            tracking: TrackingConfig::default(),
            locks: LockConfig::default(),
            cache: CacheConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load and validate a YAML file.
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: SyncConfig = serde_yaml::from_str(content)?;

        if config.version == 0 {
            return Err(ConfigError::MissingVersion);
        }
        if !SUPPORTED_VERSIONS.contains(&config.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn repository(&self, repository_id: &str) -> Option<&RepositoryCredentials> {
        self.repositories.iter().find(|r| r.id == repository_id)
    }

    pub fn repository_ids(&self) -> Vec<String> {
        self.repositories.iter().map(|r| r.id.clone()).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Content service
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContentServiceConfig {
    /// REST root, e.g. `http://host:8080/core/rest`
    pub base_url: String,

    /// Caller name sent as `app=` on token registration
    pub app: String,

    pub connect_timeout_ms: u64,

    /// Total per-request timeout
    pub request_timeout_ms: u64,

    /// Tokens closer than this to expiry are treated as expired
    pub token_refresh_margin_secs: u64,

    pub retry: RetryConfig,
}

impl Default for ContentServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/core/rest".to_string(),
            app: "indexsync".to_string(),
            connect_timeout_ms: 3_000,
            request_timeout_ms: 5_000,
            token_refresh_margin_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl ContentServiceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }
}

/// Retry of transient network failures (exponential backoff).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

/// Login used to obtain tokens for one repository.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryCredentials {
    pub id: String,
    pub username: String,
    pub password: String,
}

impl RepositoryCredentials {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for RepositoryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryCredentials")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tracking
// ═══════════════════════════════════════════════════════════════════════════

/// What happens to the cursor when an item of a batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorPolicy {
    /// Never move past the first failed item; the run stops after the batch.
    #[default]
    AtLeastOnce,
    /// Skip failed items and keep advancing.
    BestEffort,
}

impl CursorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorPolicy::AtLeastOnce => "at_least_once",
            CursorPolicy::BestEffort => "best_effort",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingConfig {
    /// Comma-separated allow-list. Empty disables filtering.
    pub mime_types: String,

    /// Index objects that carry no mime type (folders, content-less documents)
    pub index_without_mime_type: bool,

    /// Add extracted text content to documents of allowed mime types
    pub fulltext_enabled: bool,

    /// Index operations per commit
    pub batch_size: usize,

    /// Change events pulled per feed request in delta mode
    pub delta_page_size: usize,

    /// Objects listed per request in full mode
    pub full_page_size: usize,

    pub cursor_policy: CursorPolicy,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            mime_types: String::new(),
            index_without_mime_type: true,
            fulltext_enabled: true,
            batch_size: 100,
            delta_page_size: 500,
            full_page_size: 1_000,
            cursor_policy: CursorPolicy::AtLeastOnce,
        }
    }
}

impl TrackingConfig {
    /// Parsed allow-list: trimmed, lower-cased, blanks dropped.
    pub fn allowed_mime_types(&self) -> Vec<String> {
        self.mime_types
            .split(',')
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Locks, cache, index
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    pub stripes: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stripes: crate::features::locking::DEFAULT_STRIPES,
        }
    }
}

/// Partial region settings. Unset fields fall back to `cache.default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegionSettings {
    pub enabled: Option<bool>,
    pub capacity: Option<u64>,
    /// 0 keeps entries until capacity eviction
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Master switch. Disabled turns every cache call into a no-op.
    pub enabled: bool,
    pub default: RegionSettings,
    pub regions: BTreeMap<CacheRegion, RegionSettings>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default: RegionSettings {
                enabled: Some(true),
                capacity: Some(10_000),
                ttl_seconds: Some(300),
            },
            regions: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    /// Effective settings of `region`, `None` when it is disabled.
    pub fn region_spec(&self, region: CacheRegion) -> Option<RegionSpec> {
        if !self.enabled {
            return None;
        }
        let fallback = RegionSpec::default();
        let over = self.regions.get(&region).copied().unwrap_or_default();

        let enabled = over.enabled.or(self.default.enabled).unwrap_or(true);
        if !enabled {
            return None;
        }
        let capacity = over
            .capacity
            .or(self.default.capacity)
            .unwrap_or(fallback.capacity);
        let ttl = match over.ttl_seconds.or(self.default.ttl_seconds) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => fallback.ttl,
        };
        Some(RegionSpec { capacity, ttl })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Tantivy directory. Unset keeps the index in memory.
    pub directory: Option<PathBuf>,

    /// SQLite file holding cursors. Unset keeps cursors in memory.
    pub cursor_database: Option<PathBuf>,

    pub writer_memory_bytes: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            directory: None,
            cursor_database: None,
            writer_memory_bytes: 50_000_000,
        }
    }
}
