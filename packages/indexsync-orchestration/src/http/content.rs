use async_trait::async_trait;
use indexsync_core::features::cache::{CacheRegion, CacheService};
use indexsync_storage::{ContentObject, ContentSource, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ContentServiceClient;

/// Page of `GET repo/{repository}/nodes`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPage {
    pub ids: Vec<String>,
}

/// Object reads over HTTP, cached in the node region.
pub struct HttpContentSource {
    client: Arc<ContentServiceClient>,
    caches: Arc<CacheService>,
}

impl HttpContentSource {
    pub fn new(client: Arc<ContentServiceClient>, caches: Arc<CacheService>) -> Self {
        Self { client, caches }
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch_object(
        &self,
        repository_id: &str,
        object_id: &str,
    ) -> Result<Option<ContentObject>> {
        let cache = self.caches.for_repository(repository_id);
        if let Some(hit) = cache.region(CacheRegion::Node).get::<ContentObject>(object_id) {
            return Ok(Some(hit));
        }

        let object: Option<ContentObject> = self
            .client
            .get_json(repository_id, &["node", object_id], &[])
            .await?;
        if let Some(object) = &object {
            cache.region(CacheRegion::Node).put(object_id, object);
        }
        Ok(object)
    }

    async fn list_object_ids(
        &self,
        repository_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>> {
        let page: Option<ObjectPage> = self
            .client
            .get_json(
                repository_id,
                &["nodes"],
                &[("offset", offset.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        Ok(page.unwrap_or_default().ids)
    }
}
