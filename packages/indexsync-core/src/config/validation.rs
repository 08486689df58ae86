//! Configuration validation
//!
//! Every section implements [`Validatable`]; [`SyncConfig::validate`] runs
//! them all and fails on the first problem.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::sync_config::{
    CacheConfig, ContentServiceConfig, LockConfig, RepositoryCredentials, RetryConfig,
    SyncConfig, TrackingConfig,
};

pub const MAX_STRIPES: usize = 1 << 20;
pub const MAX_BATCH_SIZE: usize = 10_000;
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Trait for validatable configuration objects
pub trait Validatable {
    /// Returns `Ok(())` if valid, `Err(ConfigError)` with details if invalid.
    fn validate(&self) -> ConfigResult<()>;
}

impl Validatable for SyncConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.content_service.validate()?;
        self.tracking.validate()?;
        self.locks.validate()?;
        self.cache.validate()?;

        let mut seen = HashSet::new();
        for (i, repo) in self.repositories.iter().enumerate() {
            repo.validate().map_err(|err| match err {
                ConfigError::Invalid { field, reason } => {
                    ConfigError::invalid(format!("repositories[{}].{}", i, field), reason)
                }
                other => other,
            })?;
            if !seen.insert(repo.id.as_str()) {
                return Err(ConfigError::invalid(
                    format!("repositories[{}].id", i),
                    format!("duplicate repository '{}'", repo.id),
                ));
            }
        }
        Ok(())
    }
}

impl Validatable for ContentServiceConfig {
    fn validate(&self) -> ConfigResult<()> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "content_service.base_url",
                format!("'{}' must start with http:// or https://", self.base_url),
            ));
        }
        if self.app.trim().is_empty() {
            return Err(ConfigError::invalid("content_service.app", "must not be blank"));
        }
        if self.connect_timeout_ms == 0 || self.connect_timeout_ms > 60_000 {
            return Err(ConfigError::range_with_hint(
                "content_service.connect_timeout_ms",
                self.connect_timeout_ms,
                1,
                60_000,
                "Around 3000 is typical",
            ));
        }
        if self.request_timeout_ms < self.connect_timeout_ms || self.request_timeout_ms > 600_000 {
            return Err(ConfigError::range_with_hint(
                "content_service.request_timeout_ms",
                self.request_timeout_ms,
                self.connect_timeout_ms,
                600_000,
                "The total timeout cannot be shorter than the connect timeout",
            ));
        }
        self.retry.validate()
    }
}

impl Validatable for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 || self.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::range_with_hint(
                "content_service.retry.max_attempts",
                self.max_attempts,
                1,
                MAX_RETRY_ATTEMPTS,
                "1 disables retries",
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::range_with_hint(
                "content_service.retry.max_backoff_ms",
                self.max_backoff_ms,
                self.initial_backoff_ms,
                u64::MAX,
                "Must be at least initial_backoff_ms",
            ));
        }
        Ok(())
    }
}

impl Validatable for RepositoryCredentials {
    fn validate(&self) -> ConfigResult<()> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("id", "must not be blank"));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::invalid("username", "must not be blank"));
        }
        Ok(())
    }
}

impl Validatable for TrackingConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::range_with_hint(
                "tracking.batch_size",
                self.batch_size,
                1,
                MAX_BATCH_SIZE,
                "Default is 100",
            ));
        }
        for (field, value) in [
            ("tracking.delta_page_size", self.delta_page_size),
            ("tracking.full_page_size", self.full_page_size),
        ] {
            if value == 0 {
                return Err(ConfigError::range_with_hint(
                    field,
                    value,
                    1,
                    usize::MAX,
                    "Pages must hold at least one item",
                ));
            }
        }
        for mime in self.allowed_mime_types() {
            let well_formed = mime
                .split_once('/')
                .is_some_and(|(kind, sub)| !kind.is_empty() && !sub.is_empty());
            if !well_formed {
                return Err(ConfigError::invalid(
                    "tracking.mime_types",
                    format!("'{}' is not a type/subtype pair", mime),
                ));
            }
        }
        Ok(())
    }
}

impl Validatable for LockConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.stripes == 0 || self.stripes > MAX_STRIPES {
            return Err(ConfigError::range_with_hint(
                "locks.stripes",
                self.stripes,
                1,
                MAX_STRIPES,
                "More stripes lower contention between unrelated objects",
            ));
        }
        Ok(())
    }
}

impl Validatable for CacheConfig {
    fn validate(&self) -> ConfigResult<()> {
        let sections = std::iter::once(("default".to_string(), &self.default)).chain(
            self.regions
                .iter()
                .map(|(region, settings)| (region.as_str().to_string(), settings)),
        );
        for (name, settings) in sections {
            if settings.capacity == Some(0) {
                return Err(ConfigError::range_with_hint(
                    format!("cache.{}.capacity", name),
                    0,
                    1,
                    u64::MAX,
                    "Disable the region with 'enabled: false' instead",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CursorPolicy, RegionSettings};
    use crate::features::cache::CacheRegion;

    #[test]
    fn test_default_is_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn test_stripes_range() {
        let locks = LockConfig { stripes: 0 };
        assert!(matches!(locks.validate(), Err(ConfigError::Range { .. })));
        let locks = LockConfig {
            stripes: MAX_STRIPES + 1,
        };
        assert!(locks.validate().is_err());
        assert!(LockConfig { stripes: 1 }.validate().is_ok());
    }

    #[test]
    fn test_bad_mime_type() {
        let tracking = TrackingConfig {
            mime_types: "text/plain,pdf".into(),
            ..TrackingConfig::default()
        };
        let err = tracking.validate().unwrap_err();
        assert!(err.to_string().contains("'pdf'"));

        let tracking = TrackingConfig {
            mime_types: "text/".into(),
            cursor_policy: CursorPolicy::BestEffort,
            ..TrackingConfig::default()
        };
        assert!(tracking.validate().is_err());
    }

    #[test]
    fn test_batch_size_range() {
        let tracking = TrackingConfig {
            batch_size: 0,
            ..TrackingConfig::default()
        };
        assert!(tracking.validate().is_err());
    }

    #[test]
    fn test_timeouts() {
        let service = ContentServiceConfig {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 3_000,
            ..ContentServiceConfig::default()
        };
        assert!(service.validate().is_err());

        let service = ContentServiceConfig {
            base_url: "ftp://nope".into(),
            ..ContentServiceConfig::default()
        };
        assert!(matches!(service.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_duplicate_and_blank_repositories() {
        let mut config = SyncConfig::default();
        config.repositories = vec![
            RepositoryCredentials::new("r1", "admin", "pw"),
            RepositoryCredentials::new("r1", "admin", "pw"),
        ];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate repository 'r1'"));

        config.repositories = vec![RepositoryCredentials::new("r1", " ", "pw")];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("repositories[0].username"));
    }

    #[test]
    fn test_zero_capacity_region() {
        let mut cache = CacheConfig::default();
        cache.regions.insert(
            CacheRegion::Node,
            RegionSettings {
                capacity: Some(0),
                ..RegionSettings::default()
            },
        );
        let err = cache.validate().unwrap_err();
        assert!(err.to_string().contains("cache.node.capacity"));
    }
}
