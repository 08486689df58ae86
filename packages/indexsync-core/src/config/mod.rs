//! Configuration
//!
//! A single [`SyncConfig`] is loaded from YAML (schema v1), validated, and
//! passed explicitly to every component that needs it.
//!
//! ```rust,ignore
//! use indexsync_core::config::SyncConfig;
//!
//! let config = SyncConfig::from_yaml("indexsync.yaml")?;
//! let stripes = config.locks.stripes;
//! ```

pub mod error;
pub mod sync_config;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use sync_config::{
    CacheConfig, ContentServiceConfig, CursorPolicy, IndexConfig, LockConfig, RegionSettings,
    RepositoryCredentials, RetryConfig, SyncConfig, TrackingConfig, SUPPORTED_VERSIONS,
};
pub use validation::Validatable;
