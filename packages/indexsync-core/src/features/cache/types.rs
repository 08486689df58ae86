//! Region identifiers and settings

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Named cache namespace. Each region has its own capacity and TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheRegion {
    /// Content objects by id
    Node,
    /// Type definitions
    Type,
    Document,
    Folder,
    /// Children listing of a folder, keyed by the folder id
    Tree,
    VersionSeries,
    Attachment,
    ChangeEvent,
    /// Latest change sequence of a repository
    LatestChange,
    Cursor,
    User,
    Group,
}

impl CacheRegion {
    pub const ALL: [CacheRegion; 12] = [
        CacheRegion::Node,
        CacheRegion::Type,
        CacheRegion::Document,
        CacheRegion::Folder,
        CacheRegion::Tree,
        CacheRegion::VersionSeries,
        CacheRegion::Attachment,
        CacheRegion::ChangeEvent,
        CacheRegion::LatestChange,
        CacheRegion::Cursor,
        CacheRegion::User,
        CacheRegion::Group,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheRegion::Node => "node",
            CacheRegion::Type => "type",
            CacheRegion::Document => "document",
            CacheRegion::Folder => "folder",
            CacheRegion::Tree => "tree",
            CacheRegion::VersionSeries => "version_series",
            CacheRegion::Attachment => "attachment",
            CacheRegion::ChangeEvent => "change_event",
            CacheRegion::LatestChange => "latest_change",
            CacheRegion::Cursor => "cursor",
            CacheRegion::User => "user",
            CacheRegion::Group => "group",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for CacheRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend namespace: one region of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId {
    pub repository_id: String,
    pub region: CacheRegion,
}

impl RegionId {
    pub fn new(repository_id: impl Into<String>, region: CacheRegion) -> Self {
        Self {
            repository_id: repository_id.into(),
            region,
        }
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repository_id, self.region)
    }
}

/// Effective settings of an enabled region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSpec {
    /// Maximum number of entries
    pub capacity: u64,
    /// `None` keeps entries until evicted by capacity
    pub ttl: Option<Duration>,
}

impl Default for RegionSpec {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Some(Duration::from_secs(300)),
        }
    }
}

/// Point-in-time statistics of one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionStats {
    pub entries: u64,
    pub approx_bytes: u64,
}
