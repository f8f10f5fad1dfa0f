use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pc_common::{NewQueueItem, QueueFilter, QueueItem, QueueStats, QueueStatus};

use crate::error::StoreResult;

/// Durable storage for queued writes.
///
/// Every mutation touches a single row, so a crash mid-sync leaves each item
/// in its last durable state.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert a new `pending` item and return its id.
    async fn insert(&self, item: NewQueueItem) -> StoreResult<i64>;

    async fn get(&self, id: i64) -> StoreResult<Option<QueueItem>>;

    /// `pending` or `failed` items with `retry_count < max_attempts`, oldest first.
    async fn fetch_eligible(&self, max_attempts: u32) -> StoreResult<Vec<QueueItem>>;

    /// Atomically move an eligible item to `processing` and return its current
    /// retry count. `None` when another run got there first or the item is no
    /// longer eligible.
    async fn claim(&self, id: i64, max_attempts: u32) -> StoreResult<Option<u32>>;

    /// Refresh `updated_at` of an item still in `processing`, so stuck recovery
    /// leaves a live delivery alone. Returns false when the item is not processing.
    async fn touch(&self, id: i64) -> StoreResult<bool>;

    /// Persist one failed attempt. Returns the new retry count.
    async fn record_failure(&self, id: i64, error: &str) -> StoreResult<u32>;

    async fn mark_completed(&self, id: i64) -> StoreResult<()>;

    async fn mark_failed(&self, id: i64, error: &str) -> StoreResult<()>;

    /// Release items left in `processing` for longer than `older_than`.
    async fn recover_stuck(&self, older_than: Duration) -> StoreResult<u64>;

    /// Replace a `failed` item with a fresh `pending` copy. Returns the new id,
    /// or `None` when the item does not exist or is not failed.
    async fn requeue(&self, id: i64) -> StoreResult<Option<i64>>;

    async fn list(&self, filter: &QueueFilter) -> StoreResult<Vec<QueueItem>>;

    async fn stats(&self, max_attempts: u32) -> StoreResult<QueueStats>;

    /// Delete `completed` items last updated before `cutoff`.
    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Delete everything, or only items in `status`.
    async fn clear(&self, status: Option<QueueStatus>) -> StoreResult<u64>;

    async fn count(&self) -> StoreResult<u64>;
}
