use async_trait::async_trait;
use indexsync_storage::{ChangeEvent, ChangeFeedSource, FeedEntry, Result, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ContentServiceClient;

/// Page of `GET repo/{repository}/changes?since=&limit=`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPage {
    pub results: Vec<FeedEntry>,
}

/// Body of `GET repo/{repository}/changes/latest`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestSequence {
    pub sequence: u64,
}

pub struct HttpChangeFeed {
    client: Arc<ContentServiceClient>,
}

impl HttpChangeFeed {
    pub fn new(client: Arc<ContentServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChangeFeedSource for HttpChangeFeed {
    async fn changes_since(
        &self,
        repository_id: &str,
        since: u64,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>> {
        let page: FeedPage = self
            .client
            .get_json(
                repository_id,
                &["changes"],
                &[("since", since.to_string()), ("limit", limit.to_string())],
            )
            .await?
            .ok_or_else(|| StorageError::repository_not_found(repository_id))?;

        let mut events = page
            .results
            .into_iter()
            .filter(|entry| entry.sequence > since)
            .map(|entry| ChangeEvent::from_feed_entry(repository_id, entry))
            .collect::<Vec<_>>();
        events.sort_by_key(|e| e.sequence);
        events.truncate(limit);
        Ok(events)
    }

    async fn latest_sequence(&self, repository_id: &str) -> Result<u64> {
        let latest: LatestSequence = self
            .client
            .get_json(repository_id, &["changes", "latest"], &[])
            .await?
            .ok_or_else(|| StorageError::repository_not_found(repository_id))?;
        Ok(latest.sequence)
    }
}
