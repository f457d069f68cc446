//! Components shared by the daemon, built once at startup.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::compiler::RouteCompiler;
use crate::config::GatewayConfig;
use crate::lifecycle::Shutdown;
use crate::oracle::{AdmissionOracle, CounterRecorder};
use crate::reconcile::{ReconcileHandle, ReconcileQueue, Reconciler};
use crate::store::MemoryStore;
use crate::supervisor::ProcessSupervisor;

/// Explicit wiring of every long-lived component. Passed by reference or
/// cloned `Arc`s; there are no process-wide statics.
pub struct GatewayContext {
    pub config: Arc<GatewayConfig>,
    pub store: Arc<MemoryStore>,
    pub compiler: Arc<RouteCompiler>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub oracle: Arc<AdmissionOracle>,
    pub reconciler: Arc<Reconciler>,
    pub reconcile: ReconcileHandle,
    pub shutdown: Shutdown,
}

/// Background pieces the caller must drive or await.
pub struct ContextTasks {
    pub reconcile_queue: ReconcileQueue,
    /// Finishes once the oracle is dropped and pending counter writes are applied.
    pub counter_writer: JoinHandle<()>,
}

impl GatewayContext {
    /// Wire components from validated settings. Spawns the counter writer, so
    /// this must run inside a tokio runtime.
    pub fn build(config: GatewayConfig, store: Arc<MemoryStore>) -> (Self, ContextTasks) {
        let config = Arc::new(config);

        let compiler = Arc::new(RouteCompiler::new(store.clone(), config.proxy.clone()));
        let supervisor = Arc::new(ProcessSupervisor::new(config.supervisor.clone()));

        let (recorder, counter_writer) = CounterRecorder::spawn(store.clone(), &config.counters);
        let oracle = Arc::new(AdmissionOracle::new(
            store.clone(),
            recorder,
            config.oracle.lookup_timeout(),
        ));

        let reconciler = Arc::new(Reconciler::new(compiler.clone(), supervisor.clone()));
        let (reconcile, reconcile_queue) = Reconciler::channel();

        let context = Self {
            config,
            store,
            compiler,
            supervisor,
            oracle,
            reconciler,
            reconcile,
            shutdown: Shutdown::new(),
        };
        let tasks = ContextTasks {
            reconcile_queue,
            counter_writer,
        };
        (context, tasks)
    }
}
