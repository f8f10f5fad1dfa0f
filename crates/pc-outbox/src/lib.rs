//! PROCON Offline Queue
//!
//! Durable, retryable, at-least-once delivery of enforcement records ("autos")
//! written while the backend is unreachable.
//!
//! - [`OfflineQueue::add_to_offline_queue`] validates and stores a write
//! - [`OfflineQueue::sync_offline_queue`] delivers eligible items
//! - [`ConnectivityWatcher`] requests a sync when the backend comes back
//! - maintenance methods expose stats, listings and cleanup

pub mod error;
pub mod repository;
pub mod sqlite;
pub mod registry;
pub mod http_dispatcher;
pub mod notifier;
pub mod sync;
pub mod scheduler;
pub mod connectivity;
pub mod enqueue;
pub mod maintenance;
pub mod lifecycle;

use std::sync::Arc;
use std::time::Duration;

use pc_common::SyncResult;
use pc_config::QueueSettings;
use tracing::info;

// Re-export key types
pub use connectivity::{ConnectivityProbe, ConnectivityWatcher};
pub use enqueue::EnqueueOptions;
pub use error::{QueueError, RemoteCallError, Result, StoreError, ValidationError};
pub use lifecycle::{LifecycleConfig, QueueLifecycle};
pub use notifier::{Notice, Notifier, TracingNotifier};
pub use registry::{EndpointRegistry, RemoteCall, PROCON_ENDPOINTS};
pub use repository::QueueRepository;
pub use scheduler::{SyncScheduler, SyncTrigger};
pub use sqlite::SqliteQueueRepository;
pub use sync::{SyncEngine, SyncOptions, SyncPolicy, SyncProgress, MAX_RETRY_ATTEMPTS, RETRY_DELAY};

/// Default debounce before a requested background sync starts.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// Handle to the offline queue. Construct once and share it behind an `Arc`.
pub struct OfflineQueue {
    repository: Arc<dyn QueueRepository>,
    registry: Arc<EndpointRegistry>,
    notifier: Arc<dyn Notifier>,
    engine: Arc<SyncEngine>,
    scheduler: Arc<SyncScheduler>,
    connectivity: Arc<ConnectivityWatcher>,
}

impl OfflineQueue {
    pub fn builder(
        repository: Arc<dyn QueueRepository>,
        registry: EndpointRegistry,
    ) -> OfflineQueueBuilder {
        OfflineQueueBuilder {
            repository,
            registry,
            notifier: Arc::new(TracingNotifier),
            policy: SyncPolicy::default(),
            debounce: DEBOUNCE,
            background_options: SyncOptions::default(),
            initially_online: false,
        }
    }

    /// Deliver every eligible item now. Per-item failures are reported in the
    /// result; only store failures during selection are returned as errors.
    pub async fn sync_offline_queue(&self, options: SyncOptions) -> Result<SyncResult> {
        Ok(self.engine.run(&options).await?)
    }

    /// Ask for a debounced background sync. Returns immediately.
    pub fn request_sync(&self) {
        self.scheduler.request();
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityWatcher> {
        &self.connectivity
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &SyncPolicy {
        self.engine.policy()
    }

    pub fn repository(&self) -> &Arc<dyn QueueRepository> {
        &self.repository
    }

    /// Stop the background scheduler.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        info!("Offline queue stopped");
    }
}

pub struct OfflineQueueBuilder {
    repository: Arc<dyn QueueRepository>,
    registry: EndpointRegistry,
    notifier: Arc<dyn Notifier>,
    policy: SyncPolicy,
    debounce: Duration,
    background_options: SyncOptions,
    initially_online: bool,
}

impl OfflineQueueBuilder {
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Options used by scheduler-triggered syncs.
    pub fn background_options(mut self, options: SyncOptions) -> Self {
        self.background_options = options;
        self
    }

    pub fn initially_online(mut self, online: bool) -> Self {
        self.initially_online = online;
        self
    }

    /// Apply delivery settings from configuration.
    pub fn settings(self, settings: &QueueSettings) -> Self {
        let options = SyncOptions::default().with_max_concurrent(settings.max_concurrent);
        self.policy(SyncPolicy::from(settings))
            .debounce(settings.debounce())
            .background_options(options)
    }

    /// Build the queue and spawn its scheduler. Must be called inside a tokio runtime.
    pub fn build(self) -> OfflineQueue {
        let registry = Arc::new(self.registry);
        let engine = Arc::new(SyncEngine::new(
            self.repository.clone(),
            registry.clone(),
            self.notifier.clone(),
            self.policy,
        ));
        let scheduler = Arc::new(SyncScheduler::start(
            engine.clone(),
            self.debounce,
            self.background_options,
        ));
        let connectivity = Arc::new(ConnectivityWatcher::new(
            self.initially_online,
            scheduler.clone(),
        ));

        OfflineQueue {
            repository: self.repository,
            registry,
            notifier: self.notifier,
            engine,
            scheduler,
            connectivity,
        }
    }
}
