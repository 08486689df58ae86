//! Durable per-repository cursor
//!
//! The cursor only moves forward. The single exception is [`CursorManager::reset`],
//! used by INIT.

use indexsync_storage::{ChangeCursor, CursorStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;

pub struct CursorManager {
    store: Arc<dyn CursorStore>,
}

impl CursorManager {
    pub fn new(store: Arc<dyn CursorStore>) -> Self {
        Self { store }
    }

    /// Last fully indexed sequence, 0 when the repository was never tracked.
    pub async fn current(&self, repository_id: &str) -> Result<u64> {
        Ok(self
            .store
            .load(repository_id)
            .await?
            .map(|c| c.sequence)
            .unwrap_or(0))
    }

    /// Move the cursor to `sequence` if that is ahead of the stored value.
    ///
    /// Returns the cursor after the call.
    pub async fn advance(&self, repository_id: &str, sequence: u64) -> Result<u64> {
        let current = self.current(repository_id).await?;
        if sequence < current {
            warn!(
                repository_id,
                current, requested = sequence, "Refusing to move cursor backwards"
            );
            return Ok(current);
        }
        if sequence == current {
            return Ok(current);
        }
        self.store
            .store(&ChangeCursor::new(repository_id, sequence))
            .await?;
        debug!(repository_id, from = current, to = sequence, "Advanced cursor");
        Ok(sequence)
    }

    pub async fn reset(&self, repository_id: &str) -> Result<()> {
        self.store.store(&ChangeCursor::initial(repository_id)).await?;
        info!(repository_id, "Reset cursor");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexsync_storage::InMemoryCursorStore;

    #[tokio::test]
    async fn test_cursor_is_monotonic() {
        let cursors = CursorManager::new(Arc::new(InMemoryCursorStore::new()));
        assert_eq!(cursors.current("r").await.unwrap(), 0);

        assert_eq!(cursors.advance("r", 5).await.unwrap(), 5);
        assert_eq!(cursors.advance("r", 3).await.unwrap(), 5);
        assert_eq!(cursors.current("r").await.unwrap(), 5);

        cursors.reset("r").await.unwrap();
        assert_eq!(cursors.current("r").await.unwrap(), 0);
    }
}
