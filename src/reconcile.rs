//! The single control path from routing state to a live proxy.
//!
//! Every change goes compile → (start | reload). Nothing else in the crate
//! calls `reload()`, so a reload can never run against a half-written file.
//! Triggers are queued with capacity one: a trigger that arrives while a pass
//! is running schedules exactly one more pass, further ones coalesce into it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};

use crate::compiler::{CompileError, CompiledConfig, RouteCompiler};
use crate::supervisor::{ProcessSupervisor, SupervisorError};

/// What asked for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    /// SIGHUP from an operator or init system.
    Signal,
    /// The routing snapshot was reloaded from disk.
    SnapshotChanged,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Startup => "startup",
            Trigger::Signal => "signal",
            Trigger::SnapshotChanged => "snapshot_changed",
            Trigger::Manual => "manual",
        }
    }
}

/// Result of one pass. Failures leave the proxy on its last good configuration.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// New configuration is live. `started` is true when the proxy was (re)started
    /// rather than reloaded.
    Applied {
        config: Arc<CompiledConfig>,
        started: bool,
    },
    /// Output identical to what the running proxy already has.
    Unchanged,
    CompileFailed(CompileError),
    /// Files were written but the proxy could not be started or reloaded.
    ReloadFailed(SupervisorError),
}

impl ReconcileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied { .. } | ReconcileOutcome::Unchanged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied { .. } => "applied",
            ReconcileOutcome::Unchanged => "unchanged",
            ReconcileOutcome::CompileFailed(_) => "compile_failed",
            ReconcileOutcome::ReloadFailed(_) => "reload_failed",
        }
    }
}

/// Sends triggers to the reconcile loop.
#[derive(Debug, Clone)]
pub struct ReconcileHandle {
    tx: mpsc::Sender<Trigger>,
}

impl ReconcileHandle {
    /// Request a pass. Returns `false` if one is already queued.
    pub fn trigger(&self, trigger: Trigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(trigger = trigger.as_str(), "Reconcile already pending, coalesced");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(trigger = trigger.as_str(), "Reconcile loop stopped, trigger ignored");
                false
            }
        }
    }
}

/// Receiving side of the trigger queue.
pub struct ReconcileQueue {
    rx: mpsc::Receiver<Trigger>,
}

pub struct Reconciler {
    compiler: Arc<RouteCompiler>,
    supervisor: Arc<ProcessSupervisor>,
    in_flight: Mutex<()>,
    passes: AtomicU64,
    /// Files on disk that the running proxy has not loaded yet.
    stale: AtomicBool,
}

impl Reconciler {
    pub fn new(compiler: Arc<RouteCompiler>, supervisor: Arc<ProcessSupervisor>) -> Self {
        Self {
            compiler,
            supervisor,
            in_flight: Mutex::new(()),
            passes: AtomicU64::new(0),
            stale: AtomicBool::new(false),
        }
    }

    pub fn channel() -> (ReconcileHandle, ReconcileQueue) {
        let (tx, rx) = mpsc::channel(1);
        (ReconcileHandle { tx }, ReconcileQueue { rx })
    }

    /// Completed passes since construction.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// True when the last written configuration has not reached the proxy.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }

    /// Compile, then start the proxy if it is down or reload it if the output
    /// changed or an earlier reload never landed.
    pub async fn reconcile(&self) -> ReconcileOutcome {
        let _guard = self.in_flight.lock().await;
        let outcome = self.reconcile_locked().await;
        self.passes.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    async fn reconcile_locked(&self) -> ReconcileOutcome {
        let compiled = match self.compiler.compile().await {
            Ok(compiled) => compiled,
            Err(e) => return ReconcileOutcome::CompileFailed(e),
        };

        if !self.supervisor.is_running() {
            return match self.supervisor.start().await {
                Ok(()) => {
                    self.stale.store(false, Ordering::Relaxed);
                    ReconcileOutcome::Applied {
                        config: compiled,
                        started: true,
                    }
                }
                Err(e) => {
                    self.stale.store(true, Ordering::Relaxed);
                    ReconcileOutcome::ReloadFailed(e)
                }
            };
        }

        if !compiled.changed && !self.is_stale() {
            return ReconcileOutcome::Unchanged;
        }

        match self.supervisor.reload().await {
            Ok(()) => {
                self.stale.store(false, Ordering::Relaxed);
                ReconcileOutcome::Applied {
                    config: compiled,
                    started: false,
                }
            }
            Err(e) => {
                self.stale.store(true, Ordering::Relaxed);
                ReconcileOutcome::ReloadFailed(e)
            }
        }
    }

    /// Run passes for queued triggers until shutdown or until every handle is dropped.
    pub async fn run(self: Arc<Self>, mut queue: ReconcileQueue, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let trigger = tokio::select! {
                _ = shutdown.recv() => break,
                trigger = queue.rx.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            let outcome = self.reconcile().await;
            match &outcome {
                ReconcileOutcome::Applied { config, started } => tracing::info!(
                    trigger = trigger.as_str(),
                    started,
                    upstreams = config.stats.upstreams,
                    skipped_routes = config.stats.skipped_routes,
                    "Routing applied"
                ),
                ReconcileOutcome::Unchanged => {
                    tracing::info!(trigger = trigger.as_str(), "Routing unchanged")
                }
                ReconcileOutcome::CompileFailed(e) => tracing::error!(
                    trigger = trigger.as_str(),
                    error = %e,
                    "Compile failed, proxy keeps its previous routing"
                ),
                ReconcileOutcome::ReloadFailed(e) => tracing::error!(
                    trigger = trigger.as_str(),
                    error = %e,
                    "Proxy did not pick up the new routing, routing is stale"
                ),
            }
        }
        tracing::debug!("Reconcile loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxySettings, SupervisorConfig};
    use crate::store::{Domain, HttpRoute, ListenKind, Listener, MemoryStore};
    use std::path::PathBuf;
    use std::time::Duration;

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_listener(Listener {
                id: 1,
                listen_port: 80,
                kind: ListenKind::Http,
                enable_address_check: false,
                address_check_mode: Default::default(),
                description: String::new(),
            })
            .await;
        store.upsert_domain(Domain { id: 1, name: "a.example.com".into() }).await;
        store.upsert_http_route(HttpRoute { id: 1, domain_id: 1, listen_id: 1 }).await;
        store
    }

    fn reconciler(store: Arc<MemoryStore>, dir: &std::path::Path) -> Reconciler {
        let settings = ProxySettings {
            prefix: dir.to_path_buf(),
            ..ProxySettings::default()
        };
        let supervisor = SupervisorConfig {
            binary: PathBuf::from("/bin/sh"),
            args: Some(vec![
                "-c".to_string(),
                "trap '' HUP; while :; do sleep 0.1; done".to_string(),
            ]),
            probe_interval_ms: 20,
            stop_timeout_secs: 2,
            test_before_reload: false,
            ..SupervisorConfig::default()
        };
        Reconciler::new(
            Arc::new(RouteCompiler::new(store, settings)),
            Arc::new(ProcessSupervisor::new(supervisor)),
        )
    }

    #[tokio::test]
    async fn test_start_then_unchanged_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded().await;
        let reconciler = reconciler(store.clone(), dir.path());

        let outcome = reconciler.reconcile().await;
        assert!(matches!(outcome, ReconcileOutcome::Applied { started: true, .. }));

        let outcome = reconciler.reconcile().await;
        assert!(matches!(outcome, ReconcileOutcome::Unchanged));

        store.upsert_domain(Domain { id: 2, name: "b.example.com".into() }).await;
        store.upsert_http_route(HttpRoute { id: 2, domain_id: 2, listen_id: 1 }).await;
        let outcome = reconciler.reconcile().await;
        assert!(matches!(outcome, ReconcileOutcome::Applied { started: false, .. }));
        assert_eq!(reconciler.passes(), 3);

        reconciler.supervisor.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_compile_failure_keeps_proxy_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded().await;
        let reconciler = reconciler(store.clone(), dir.path());
        assert!(reconciler.reconcile().await.is_success());

        store
            .upsert_listener(Listener {
                id: 2,
                listen_port: 0,
                kind: ListenKind::Http,
                enable_address_check: false,
                address_check_mode: Default::default(),
                description: String::new(),
            })
            .await;
        store.upsert_http_route(HttpRoute { id: 3, domain_id: 1, listen_id: 2 }).await;

        let outcome = reconciler.reconcile().await;
        assert!(matches!(outcome, ReconcileOutcome::CompileFailed(_)));
        assert!(reconciler.supervisor.is_running());

        reconciler.supervisor.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_reload_is_retried_until_applied() {
        let dir = tempfile::tempdir().unwrap();
        let reject = dir.path().join("reject");
        let store = seeded().await;

        let mut reconciler = reconciler(store.clone(), dir.path());
        let supervisor = SupervisorConfig {
            binary: PathBuf::from("/bin/sh"),
            args: Some(vec![
                "-c".to_string(),
                "trap '' HUP; while :; do sleep 0.1; done".to_string(),
            ]),
            test_args: Some(vec![
                "-c".to_string(),
                format!("! test -e '{}'", reject.display()),
            ]),
            probe_interval_ms: 20,
            stop_timeout_secs: 2,
            test_before_reload: true,
            ..SupervisorConfig::default()
        };
        reconciler.supervisor = Arc::new(ProcessSupervisor::new(supervisor));

        assert!(matches!(
            reconciler.reconcile().await,
            ReconcileOutcome::Applied { started: true, .. }
        ));

        std::fs::write(&reject, "").unwrap();
        store.upsert_domain(Domain { id: 2, name: "b.example.com".into() }).await;
        store.upsert_http_route(HttpRoute { id: 2, domain_id: 2, listen_id: 1 }).await;
        let outcome = reconciler.reconcile().await;
        assert!(matches!(
            outcome,
            ReconcileOutcome::ReloadFailed(SupervisorError::ConfigTest(_))
        ));
        assert!(reconciler.is_stale());

        // Same routing state: the files are unchanged but never reached the proxy.
        let outcome = reconciler.reconcile().await;
        assert!(!outcome.is_success());
        assert!(reconciler.is_stale());

        std::fs::remove_file(&reject).unwrap();
        let outcome = reconciler.reconcile().await;
        assert!(matches!(outcome, ReconcileOutcome::Applied { started: false, .. }));
        assert!(!reconciler.is_stale());

        assert!(matches!(reconciler.reconcile().await, ReconcileOutcome::Unchanged));

        reconciler.supervisor.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_triggers_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Arc::new(reconciler(seeded().await, dir.path()));
        let (handle, queue) = Reconciler::channel();

        assert!(handle.trigger(Trigger::Startup));
        assert!(!handle.trigger(Trigger::Signal));
        assert!(!handle.trigger(Trigger::SnapshotChanged));
        drop(handle);

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::time::timeout(Duration::from_secs(10), reconciler.clone().run(queue, shutdown_rx))
            .await
            .unwrap();
        assert_eq!(reconciler.passes(), 1);

        reconciler.supervisor.stop(false).await.unwrap();
    }
}
