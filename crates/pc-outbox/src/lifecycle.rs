//! Lifecycle - background tasks for a running queue
//!
//! Handles:
//! - Periodic retention cleanup
//! - Periodic sync requests while the backend is reachable
//! - Graceful shutdown coordination

use std::sync::Arc;
use std::time::Duration;

use pc_config::ProcessorSettings;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::OfflineQueue;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Interval between retention cleanups
    pub cleanup_interval: Duration,
    /// Interval between sync requests while online
    pub sync_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(3600),
            sync_interval: Duration::from_secs(60),
        }
    }
}

impl From<&ProcessorSettings> for LifecycleConfig {
    fn from(settings: &ProcessorSettings) -> Self {
        Self {
            cleanup_interval: Duration::from_secs(settings.cleanup_interval_secs),
            sync_interval: Duration::from_secs(settings.sync_interval_secs),
        }
    }
}

pub struct QueueLifecycle {
    shutdown_tx: broadcast::Sender<()>,
}

impl QueueLifecycle {
    /// Spawn the lifecycle tasks.
    pub fn start(queue: Arc<OfflineQueue>, config: LifecycleConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        // Retention cleanup
        {
            let queue = queue.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.cleanup_interval;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            debug!("Running offline queue cleanup");
                            if let Err(e) = queue.cleanup_old_items().await {
                                warn!("Offline queue cleanup failed: {}", e);
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Cleanup task shutting down");
                            break;
                        }
                    }
                }
            });
        }

        // Periodic sync, catches items left behind by failed runs
        {
            let queue = queue.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.sync_interval;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if queue.connectivity().is_online() {
                                debug!("Requesting periodic sync");
                                queue.request_sync();
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Periodic sync task shutting down");
                            break;
                        }
                    }
                }
            });
        }

        info!("Offline queue lifecycle tasks started");
        Self { shutdown_tx }
    }

    /// Receiver for tasks that should stop together with the lifecycle.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        info!("Shutting down offline queue lifecycle tasks");
        let _ = self.shutdown_tx.send(());
    }
}
