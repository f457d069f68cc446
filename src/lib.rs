//! Proxy reconciliation and admission-control engine.

// Core subsystems
pub mod compiler;
pub mod conf;
pub mod oracle;
pub mod store;
pub mod supervisor;

// Control path
pub mod context;
pub mod reconcile;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use compiler::{CompileError, CompiledConfig, RouteCompiler};
pub use conf::{ConfigModel, ValidationError};
pub use config::GatewayConfig;
pub use context::GatewayContext;
pub use lifecycle::Shutdown;
pub use oracle::AdmissionOracle;
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use store::{DataStoreError, MemoryStore};
pub use supervisor::{ProcessSupervisor, SupervisorError, SupervisorState};
