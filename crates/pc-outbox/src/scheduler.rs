//! Debounced Sync Scheduler
//!
//! Background syncs are requested, never awaited. Requests land in a single
//! slot, so any number of them issued before or during a run coalesce into at
//! most one follow-up run. Runs never overlap.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use pc_common::SyncResult;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::sync::{SyncEngine, SyncOptions};

/// Something that can be asked to sync in the background.
pub trait SyncTrigger: Send + Sync {
    fn request(&self);
}

#[derive(Default)]
struct SchedulerState {
    requests: AtomicU64,
    runs: AtomicU64,
    running: AtomicBool,
    last_result: Mutex<Option<SyncResult>>,
}

pub struct SyncScheduler {
    pending: Arc<Notify>,
    state: Arc<SchedulerState>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    /// Spawn the scheduler task. Must be called inside a tokio runtime.
    pub fn start(engine: Arc<SyncEngine>, debounce: Duration, options: SyncOptions) -> Self {
        let pending = Arc::new(Notify::new());
        let state = Arc::new(SchedulerState::default());
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = {
            let pending = pending.clone();
            let state = state.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = pending.notified() => {}
                        _ = shutdown_rx.recv() => break,
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(debounce) => {}
                        _ = shutdown_rx.recv() => break,
                    }
                    // Requests made during the debounce window ride along with this run
                    let _ = pending.notified().now_or_never();

                    state.running.store(true, Ordering::SeqCst);
                    debug!("Starting scheduled sync");
                    match engine.run(&options).await {
                        Ok(result) => {
                            if result.has_failures() {
                                warn!(
                                    failed = result.failed,
                                    skipped = result.skipped,
                                    "Scheduled sync left items undelivered"
                                );
                            }
                            *state.last_result.lock() = Some(result);
                        }
                        Err(e) => error!("Scheduled sync failed: {}", e),
                    }
                    state.runs.fetch_add(1, Ordering::SeqCst);
                    state.running.store(false, Ordering::SeqCst);
                }
                info!("Sync scheduler shutting down");
            })
        };

        Self {
            pending,
            state,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn request(&self) {
        self.state.requests.fetch_add(1, Ordering::SeqCst);
        self.pending.notify_one();
    }

    /// Number of sync requests received.
    pub fn requests(&self) -> u64 {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Number of runs the scheduler has finished.
    pub fn runs(&self) -> u64 {
        self.state.runs.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn last_result(&self) -> Option<SyncResult> {
        self.state.last_result.lock().clone()
    }

    /// Stop the task. A run already in progress finishes first.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Sync scheduler task failed: {}", e);
            }
        }
    }
}

impl SyncTrigger for SyncScheduler {
    fn request(&self) {
        SyncScheduler::request(self);
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteCallError;
    use crate::notifier::TracingNotifier;
    use crate::registry::{EndpointRegistry, RemoteCall};
    use crate::repository::QueueRepository;
    use crate::sqlite::SqliteQueueRepository;
    use crate::sync::SyncPolicy;
    use async_trait::async_trait;
    use pc_common::NewQueueItem;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl RemoteCall for Counting {
        async fn call(&self, _payload: &Value) -> Result<(), RemoteCallError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn engine(calls: Arc<AtomicUsize>) -> (Arc<SqliteQueueRepository>, Arc<SyncEngine>) {
        let repo = Arc::new(SqliteQueueRepository::in_memory().await.unwrap());
        let registry = EndpointRegistry::builder()
            .register("autobanco", Counting(calls))
            .build();
        let engine = SyncEngine::new(
            repo.clone(),
            Arc::new(registry),
            Arc::new(TracingNotifier),
            SyncPolicy::default(),
        );
        (repo, Arc::new(engine))
    }

    async fn wait_for_runs(scheduler: &SyncScheduler, runs: u64) {
        for _ in 0..200 {
            if scheduler.runs() >= runs {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scheduler did not reach {} runs", runs);
    }

    #[tokio::test]
    async fn test_requests_coalesce_into_one_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (repo, engine) = engine(calls.clone()).await;
        repo.insert(NewQueueItem {
            endpoint: "autobanco".to_string(),
            payload: json!({"placa": "ABC1234"}),
            priority: 0,
            metadata: None,
        })
        .await
        .unwrap();

        let scheduler = SyncScheduler::start(engine, Duration::from_millis(50), SyncOptions::default());
        for _ in 0..5 {
            scheduler.request();
        }

        wait_for_runs(&scheduler, 1).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(scheduler.requests(), 5);
        assert_eq!(scheduler.runs(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.last_result().unwrap().success, 1);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_after_run_triggers_another() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_repo, engine) = engine(calls).await;
        let scheduler = SyncScheduler::start(engine, Duration::from_millis(5), SyncOptions::default());

        scheduler.request();
        wait_for_runs(&scheduler, 1).await;
        scheduler.request();
        wait_for_runs(&scheduler, 2).await;

        assert_eq!(scheduler.last_result(), Some(SyncResult::default()));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_without_requests() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_repo, engine) = engine(calls).await;
        let scheduler = SyncScheduler::start(engine, Duration::from_millis(5), SyncOptions::default());

        scheduler.shutdown().await;
        assert_eq!(scheduler.runs(), 0);
        assert!(!scheduler.is_running());
    }
}
