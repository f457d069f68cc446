//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     settings → logging → metrics → store snapshot → context
//!     → oracle listener → initial reconcile (compile + start) → signal loop
//!
//! Signals (signals.rs):
//!     SIGHUP → reconcile trigger
//!     SIGTERM/SIGINT → shutdown
//!
//! Shutdown (shutdown.rs):
//!     broadcast → oracle drains → proxy stopped gracefully
//!     → pending counter writes applied → snapshot persisted
//! ```
//!
//! # Design Decisions
//! - Ordered startup: the oracle is up before the proxy that calls it
//! - Ordered shutdown: the proxy stops before the oracle's state is persisted
//! - A failed initial compile is logged, not fatal; SIGHUP retries it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, StartupError};
