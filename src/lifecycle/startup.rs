//! Startup orchestration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::watcher::FileWatcher;
use crate::config::GatewayConfig;
use crate::context::GatewayContext;
use crate::lifecycle::signals;
use crate::net::load_tls_config;
use crate::observability::{logging, metrics};
use crate::oracle::server;
use crate::reconcile::{ReconcileHandle, Trigger};
use crate::store::{DataStoreError, MemoryStore};

/// Quiet period after a snapshot change before it is reloaded.
const SNAPSHOT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Upper bound on draining queued counter writes at shutdown.
const COUNTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load routing snapshot: {0}")]
    Store(#[from] DataStoreError),

    #[error("invalid oracle address '{0}'")]
    Address(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load TLS configuration: {0}")]
    Tls(#[source] std::io::Error),

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error("failed to watch routing snapshot: {0}")]
    Watch(#[from] notify::Error),
}

/// Run the daemon until SIGTERM/SIGINT. `config` must already be validated.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gatehouse starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = match &config.store.snapshot_path {
        Some(path) => Arc::new(MemoryStore::load_from_file(path).await?),
        None => {
            tracing::warn!("No routing snapshot configured, starting with an empty store");
            Arc::new(MemoryStore::new())
        }
    };

    let (context, tasks) = GatewayContext::build(config, store);
    let config = context.config.clone();

    let addr: SocketAddr = config
        .oracle
        .bind_address
        .parse()
        .map_err(|_| StartupError::Address(config.oracle.bind_address.clone()))?;
    let router = server::build_router(
        context.oracle.clone(),
        Duration::from_secs(config.oracle.request_timeout_secs),
    );
    let oracle_task = match &config.oracle.tls {
        Some(tls) => {
            let rustls = load_tls_config(tls).await.map_err(StartupError::Tls)?;
            tokio::spawn(server::serve_tls(addr, router, rustls, context.shutdown.wait()))
        }
        None => {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| StartupError::Bind { addr, source })?;
            tokio::spawn(server::serve(listener, router, context.shutdown.wait()))
        }
    };

    let reconcile_task = tokio::spawn(
        context
            .reconciler
            .clone()
            .run(tasks.reconcile_queue, context.shutdown.subscribe()),
    );
    context.reconcile.trigger(Trigger::Startup);

    let _watcher = match (&config.store.snapshot_path, config.store.watch) {
        (Some(path), true) => Some(spawn_snapshot_watcher(
            path.clone(),
            context.store.clone(),
            context.reconcile.clone(),
            context.shutdown.subscribe(),
        )?),
        _ => None,
    };

    let waited = signals::wait_for_shutdown(&context.reconcile).await;

    tracing::info!("Shutting down");
    context.shutdown.trigger();
    let _ = reconcile_task.await;

    if let Err(e) = context.supervisor.stop(true).await {
        tracing::warn!(error = %e, "Proxy did not stop cleanly");
    }

    match oracle_task.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Admission oracle failed"),
        Err(e) => tracing::error!(error = %e, "Admission oracle task panicked"),
        Ok(Ok(())) => {}
    }

    let GatewayContext { store, oracle, .. } = context;
    drop(oracle);
    if tokio::time::timeout(COUNTER_DRAIN_TIMEOUT, tasks.counter_writer)
        .await
        .is_err()
    {
        tracing::warn!("Pending counter writes not drained before shutdown");
    }

    if config.store.persist_on_shutdown {
        if let Err(e) = store.save_to_file().await {
            tracing::error!(error = %e, "Failed to persist routing snapshot");
        }
    }

    tracing::info!("Shutdown complete");
    waited.map_err(StartupError::Signals)
}

/// Reload the store when the snapshot file changes, then request a reconcile.
fn spawn_snapshot_watcher(
    path: PathBuf,
    store: Arc<MemoryStore>,
    reconcile: ReconcileHandle,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<notify::RecommendedWatcher, notify::Error> {
    let (watcher, mut changes) = FileWatcher::new(&path);
    let guard = watcher.run()?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                change = changes.recv() => {
                    if change.is_none() {
                        break;
                    }
                    tokio::time::sleep(SNAPSHOT_DEBOUNCE).await;
                    while changes.try_recv().is_ok() {}

                    match store.reload_from_file().await {
                        Ok(()) => {
                            tracing::info!(path = %path.display(), "Routing snapshot reloaded");
                            reconcile.trigger(Trigger::SnapshotChanged);
                        }
                        Err(e) => tracing::error!(
                            path = %path.display(),
                            error = %e,
                            "Failed to reload routing snapshot, keeping current state"
                        ),
                    }
                }
            }
        }
    });

    Ok(guard)
}
