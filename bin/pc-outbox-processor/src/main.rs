//! PROCON Offline Queue Processor
//!
//! Hosts the offline write queue: stores enforcement records locally, probes
//! the backend and syncs queued records whenever it is reachable.
//!
//! Configuration comes from `config/outbox.toml` (or `PC_CONFIG`) and `PC_*`
//! environment variables; see `pc-config` for the full list.
//!
//! ## Endpoints
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET /health` | Liveness |
//! | `GET /ready` | Readiness and connectivity |
//! | `GET /queue/stats` | Per-status counts |
//! | `GET /queue/items` | Items, filtered by `status` and `endpoint` |
//! | `GET /queue/items/:id` | Single item |
//! | `POST /queue/items/:id/requeue` | Fresh retry budget for a failed item |
//! | `DELETE /queue/items` | Clear the queue, or one `status` |
//! | `POST /queue/sync` | Run a sync now |
//! | `POST /queue/autos/:endpoint` | Queue a write |

mod api;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pc_config::ProconConfig;
use pc_outbox::{
    ConnectivityProbe, EndpointRegistry, LifecycleConfig, OfflineQueue, QueueLifecycle,
    SqliteQueueRepository,
};

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ProconConfig::load()?;
    init_logging(config.processor.log_json);

    info!("Starting PROCON Offline Queue Processor");

    // Setup shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Queue store
    let repo = SqliteQueueRepository::open(&config.queue.database_url)
        .await?
        .with_max_items(config.queue.max_items);
    info!("Queue store ready: {}", config.queue.database_url);

    // Endpoint registry
    let registry = EndpointRegistry::procon_http(&config.api)?;
    anyhow::ensure!(!registry.is_empty(), "No endpoints registered");
    info!("Registered {} endpoints against {}", registry.len(), config.api.base_url);

    let queue = Arc::new(
        OfflineQueue::builder(Arc::new(repo), registry)
            .settings(&config.queue)
            .build(),
    );

    // Cleanup and periodic sync
    let lifecycle = QueueLifecycle::start(queue.clone(), LifecycleConfig::from(&config.processor));

    // Connectivity probe, stopped with the lifecycle tasks
    let probe = ConnectivityProbe::new(
        &config.api,
        Duration::from_secs(config.processor.probe_interval_secs),
        queue.connectivity().clone(),
    )?;
    let probe_handle = {
        let shutdown_rx = lifecycle.subscribe();
        tokio::spawn(async move {
            probe.run(shutdown_rx).await;
        })
    };

    // HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.processor.http_port));
    let app = api::router(api::AppState {
        queue: queue.clone(),
        max_concurrent: config.queue.max_concurrent,
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Operations server listening on http://{}", addr);

    let server_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        })
    };

    info!("PROCON Offline Queue Processor started");
    info!("Press Ctrl+C to shutdown");

    // Wait for shutdown
    shutdown_signal().await;
    info!("Shutdown signal received...");

    let _ = shutdown_tx.send(());
    lifecycle.shutdown();

    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = probe_handle.await;
        let _ = server_handle.await;
        queue.shutdown().await;
    })
    .await;

    info!("PROCON Offline Queue Processor shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
