//! Sync Engine
//!
//! Delivers eligible queue items in chunks of `max_concurrent`. Chunks run one
//! after another; items inside a chunk are delivered concurrently. Each item is
//! claimed with a conditional update before any network call, retried with
//! exponential backoff while its lifetime retry budget lasts, and every outcome
//! is persisted on the item's own row as soon as it is known.
//!
//! While an item is being delivered its row is refreshed every third of the
//! stuck timeout, so a run that starts meanwhile never recovers it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use pc_common::{QueueItem, QueueStatus, SyncErrorEntry, SyncResult};
use pc_config::QueueSettings;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::StoreResult;
use crate::maintenance::delete_expired;
use crate::notifier::{Notice, Notifier};
use crate::registry::{EndpointRegistry, RemoteCall};
use crate::repository::QueueRepository;

/// Delivery attempts an item may make over its whole lifetime.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;
/// Base delay of the exponential backoff between attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(1000);
/// How long completed items are kept before cleanup deletes them.
pub const RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Items left in `processing` longer than this are released at the start of a run.
pub const STUCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Delay before the `attempt`-th try of a run (0-based). The first try never waits.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(attempt - 1);
    base.saturating_mul(factor)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub retention: Duration,
    pub stuck_timeout: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            retry_delay: RETRY_DELAY,
            retention: RETENTION,
            stuck_timeout: STUCK_TIMEOUT,
        }
    }
}

impl SyncPolicy {
    /// How often a claimed item's row is refreshed during delivery.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.stuck_timeout / 3).max(Duration::from_millis(1))
    }
}

impl From<&QueueSettings> for SyncPolicy {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            max_retry_attempts: settings.max_retry_attempts,
            retry_delay: settings.retry_delay(),
            retention: settings.retention(),
            stuck_timeout: settings.stuck_timeout(),
        }
    }
}

/// Per-item outcome reported to `SyncOptions::on_progress`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncProgress {
    /// Delivered on the given attempt of this run (0 = first try).
    Success { item: QueueItem, attempt: u32 },
    /// Every attempt this run allowed was rejected.
    Failed { item: QueueItem, error: String },
}

pub type ProgressCallback = Arc<dyn Fn(SyncProgress) + Send + Sync>;

#[derive(Clone)]
pub struct SyncOptions {
    pub max_concurrent: usize,
    pub stop_on_first_error: bool,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            stop_on_first_error: false,
            on_progress: None,
        }
    }
}

impl SyncOptions {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn stop_on_first_error(mut self, stop: bool) -> Self {
        self.stop_on_first_error = stop;
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(SyncProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    fn report(&self, progress: SyncProgress) {
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("max_concurrent", &self.max_concurrent)
            .field("stop_on_first_error", &self.stop_on_first_error)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

enum ItemOutcome {
    Completed,
    Failed(SyncErrorEntry),
    Skipped(SyncErrorEntry),
    /// Claimed by an overlapping run, or no longer eligible
    NotClaimed,
}

fn entry(item: &QueueItem, error: impl Into<String>) -> SyncErrorEntry {
    SyncErrorEntry {
        item_id: item.id,
        endpoint: item.endpoint.clone(),
        error: error.into(),
    }
}

pub struct SyncEngine {
    repository: Arc<dyn QueueRepository>,
    registry: Arc<EndpointRegistry>,
    notifier: Arc<dyn Notifier>,
    policy: SyncPolicy,
}

impl SyncEngine {
    pub fn new(
        repository: Arc<dyn QueueRepository>,
        registry: Arc<EndpointRegistry>,
        notifier: Arc<dyn Notifier>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            repository,
            registry,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Run one sync pass. Only store failures during selection are returned as
    /// errors; per-item failures are reported in the result.
    pub async fn run(&self, options: &SyncOptions) -> StoreResult<SyncResult> {
        self.repository.recover_stuck(self.policy.stuck_timeout).await?;

        let items = self
            .repository
            .fetch_eligible(self.policy.max_retry_attempts)
            .await?;

        let mut result = SyncResult::default();
        if items.is_empty() {
            debug!("No queued items eligible for sync");
            return Ok(result);
        }

        let chunk_size = options.max_concurrent.max(1);
        info!(
            "Syncing {} queued items in chunks of {}",
            items.len(),
            chunk_size
        );

        for chunk in items.chunks(chunk_size) {
            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|item| self.process_item(item.clone(), options)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    ItemOutcome::Completed => result.success += 1,
                    ItemOutcome::Failed(entry) => {
                        result.failed += 1;
                        result.errors.push(entry);
                    }
                    ItemOutcome::Skipped(entry) => {
                        result.skipped += 1;
                        result.errors.push(entry);
                    }
                    ItemOutcome::NotClaimed => {}
                }
            }

            if options.stop_on_first_error && result.failed > 0 {
                warn!("Stopping sync after first failure, remaining chunks left for the next run");
                break;
            }
        }

        match delete_expired(self.repository.as_ref(), self.policy.retention).await {
            Ok(deleted) if deleted > 0 => debug!("Post-sync cleanup removed {} items", deleted),
            Ok(_) => {}
            Err(e) => warn!("Post-sync cleanup failed: {}", e),
        }

        info!(
            success = result.success,
            failed = result.failed,
            skipped = result.skipped,
            "Sync finished"
        );

        if result.processed() > 0 {
            self.notifier.notify(Notice::SyncFinished {
                success: result.success,
                failed: result.failed,
                skipped: result.skipped,
            });
        }

        Ok(result)
    }

    async fn process_item(&self, mut item: QueueItem, options: &SyncOptions) -> ItemOutcome {
        let max_attempts = self.policy.max_retry_attempts;

        let retry_count = match self.repository.claim(item.id, max_attempts).await {
            Ok(Some(retry_count)) => retry_count,
            Ok(None) => {
                debug!(item_id = item.id, "Queue item already claimed, skipping");
                return ItemOutcome::NotClaimed;
            }
            Err(e) => {
                error!(item_id = item.id, endpoint = %item.endpoint, "Failed to claim queue item: {}", e);
                return ItemOutcome::Skipped(entry(&item, e.to_string()));
            }
        };
        item.status = QueueStatus::Processing;
        item.retry_count = retry_count;

        // Enqueue validates endpoints, so this only happens if the registry changed since
        let Some(call) = self.registry.get(&item.endpoint) else {
            let message = format!("No remote call registered for endpoint '{}'", item.endpoint);
            error!(item_id = item.id, endpoint = %item.endpoint, "{}", message);
            self.release(&item, &message).await;
            return ItemOutcome::Skipped(entry(&item, message));
        };

        let id = item.id;
        self.with_heartbeat(id, self.deliver(item, call.as_ref(), options))
            .await
    }

    /// Attempt loop for a claimed item, bounded by its remaining retry budget.
    async fn deliver(
        &self,
        mut item: QueueItem,
        call: &dyn RemoteCall,
        options: &SyncOptions,
    ) -> ItemOutcome {
        let max_attempts = self.policy.max_retry_attempts;
        let mut attempt: u32 = 0;
        let mut last_error = String::new();

        while item.retry_count < max_attempts {
            if attempt > 0 {
                let delay = backoff_delay(self.policy.retry_delay, attempt);
                debug!(item_id = item.id, attempt, "Retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            match call.call(&item.payload).await {
                Ok(()) => {
                    if let Err(e) = self.repository.mark_completed(item.id).await {
                        error!(item_id = item.id, endpoint = %item.endpoint, "Delivered but failed to mark completed: {}", e);
                        return ItemOutcome::Skipped(entry(&item, e.to_string()));
                    }
                    info!(item_id = item.id, endpoint = %item.endpoint, attempt, "Queue item delivered");
                    item.status = QueueStatus::Completed;
                    item.last_error = None;
                    item.updated_at = Utc::now();
                    options.report(SyncProgress::Success { item, attempt });
                    return ItemOutcome::Completed;
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        item_id = item.id,
                        endpoint = %item.endpoint,
                        attempt,
                        status = e.status_code(),
                        "Delivery failed: {}",
                        last_error
                    );
                    match self.repository.record_failure(item.id, &last_error).await {
                        Ok(retry_count) => {
                            item.retry_count = retry_count;
                            item.last_error = Some(last_error.clone());
                        }
                        Err(e) => {
                            error!(item_id = item.id, "Failed to record delivery failure: {}", e);
                            self.release(&item, &last_error).await;
                            return ItemOutcome::Skipped(entry(&item, e.to_string()));
                        }
                    }
                }
            }
            attempt += 1;
        }

        if let Err(e) = self.repository.mark_failed(item.id, &last_error).await {
            error!(item_id = item.id, "Failed to mark queue item failed: {}", e);
            return ItemOutcome::Skipped(entry(&item, e.to_string()));
        }
        warn!(
            item_id = item.id,
            endpoint = %item.endpoint,
            retry_count = item.retry_count,
            "Queue item failed after {} attempts",
            attempt
        );
        item.status = QueueStatus::Failed;
        item.updated_at = Utc::now();
        let failure = entry(&item, last_error.clone());
        options.report(SyncProgress::Failed { item, error: last_error });
        ItemOutcome::Failed(failure)
    }

    /// Drive `work` to completion, refreshing the claim on `id` every
    /// heartbeat interval.
    async fn with_heartbeat<F>(&self, id: i64, work: F) -> F::Output
    where
        F: Future,
    {
        let period = self.policy.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(work);

        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = heartbeat.tick() => {
                    match self.repository.touch(id).await {
                        Ok(true) => {}
                        Ok(false) => warn!(item_id = id, "Claim lost while delivering queue item"),
                        Err(e) => warn!(item_id = id, "Failed to refresh claim: {}", e),
                    }
                }
            }
        }
    }

    /// Best-effort: put a claimed item back to `failed` without spending an attempt.
    async fn release(&self, item: &QueueItem, error: &str) {
        if let Err(e) = self.repository.mark_failed(item.id, error).await {
            warn!(item_id = item.id, "Failed to release queue item: {}", e);
        }
    }
}
