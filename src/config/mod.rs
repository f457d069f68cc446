//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! gatehouse.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all problems at once)
//!     → GatewayConfig (validated, immutable)
//!     → split into per-subsystem sections when the context is built
//!
//! Routing snapshot (JSON):
//!     watcher.rs detects change
//!     → store reload
//!     → reconcile trigger
//! ```
//!
//! # Design Decisions
//! - Settings are immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CounterConfig, GatewayConfig, LogFormat, ObservabilityConfig, OracleConfig, ProxySettings,
    StoreConfig, SupervisorConfig, TlsConfig,
};
pub use validation::{validate_config, ConfigValidationError};
