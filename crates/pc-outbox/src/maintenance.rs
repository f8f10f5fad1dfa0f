//! Maintenance: retention cleanup, stats and inspection.

use std::time::Duration;

use chrono::{DateTime, Utc};
use pc_common::{QueueFilter, QueueItem, QueueStats, QueueStatus};
use tracing::{info, warn};

use crate::error::{QueueError, Result, StoreResult, ValidationError};
use crate::repository::QueueRepository;
use crate::OfflineQueue;

/// Cutoff for completed items: anything last updated before it has outlived `retention`.
pub fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|retention| now.checked_sub_signed(retention))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(crate) async fn delete_expired(
    repository: &dyn QueueRepository,
    retention: Duration,
) -> StoreResult<u64> {
    let cutoff = retention_cutoff(Utc::now(), retention);
    repository.delete_completed_before(cutoff).await
}

impl OfflineQueue {
    /// Delete completed items older than the retention window. Idempotent.
    pub async fn cleanup_old_items(&self) -> Result<u64> {
        let deleted = delete_expired(self.repository.as_ref(), self.policy().retention).await?;
        if deleted > 0 {
            info!("Cleaned up {} completed queue items", deleted);
        }
        Ok(deleted)
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStats> {
        Ok(self
            .repository
            .stats(self.policy().max_retry_attempts)
            .await?)
    }

    pub async fn get_queue_items(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>> {
        Ok(self.repository.list(filter).await?)
    }

    pub async fn get_queue_item(&self, id: i64) -> Result<QueueItem> {
        self.repository
            .get(id)
            .await?
            .ok_or(QueueError::NotFound { id })
    }

    /// Delete every item, or only those in `status`. Returns the number deleted.
    pub async fn clear_queue(&self, status: Option<QueueStatus>) -> Result<u64> {
        let deleted = self.repository.clear(status).await?;
        match status {
            Some(status) => warn!("Cleared {} {} items from the offline queue", deleted, status),
            None => warn!("Cleared {} items from the offline queue", deleted),
        }
        Ok(deleted)
    }

    /// Give a failed item a fresh retry budget. The item is replaced by a
    /// pending copy with a new id, which is returned.
    pub async fn requeue_failed_item(&self, id: i64) -> Result<i64> {
        let item = self.get_queue_item(id).await?;
        if item.status != QueueStatus::Failed {
            return Err(invalid_state(&item).into());
        }

        match self.repository.requeue(id).await? {
            Some(new_id) => {
                info!(item_id = id, new_item_id = new_id, endpoint = %item.endpoint, "Requeued failed item");
                Ok(new_id)
            }
            // Picked up by a sync between the read and the requeue
            None => match self.repository.get(id).await? {
                Some(current) => Err(invalid_state(&current).into()),
                None => Err(QueueError::NotFound { id }),
            },
        }
    }
}

fn invalid_state(item: &QueueItem) -> ValidationError {
    ValidationError::InvalidState {
        id: item.id,
        status: item.status.to_string(),
        expected: QueueStatus::Failed.to_string(),
    }
}
