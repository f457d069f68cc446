//! Data-store interfaces.
//!
//! # Data Flow
//! ```text
//! Route Compiler:
//!     RouteStore::read_view() (one consistent copy per pass)
//!     → list_listeners()
//!     → list_stream_routes_by_listener() / list_http_routes_by_listener()
//!     → get_domain() / get_ssh_port() per row
//!
//! Admission Oracle:
//!     AccessStore::find_listener()
//!     → find_enabled_blacklist_entry() / find_enabled_whitelist_entry()
//!     → increment_*_counter() (off the request path)
//! ```
//!
//! # Design Decisions
//! - The relational store is an external collaborator; only these traits are assumed
//! - `MemoryStore` implements both traits and backs the daemon and the tests
//! - Row-level corruption is distinguishable from a store that is unreachable

pub mod memory;
pub mod model;
pub mod view;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemoryStore, Snapshot};
pub use view::RouteView;
pub use model::{
    AddressCheckMode, BalancingAlgorithm, BlacklistEntry, DestinationType, Domain, HttpRoute,
    ListenKind, Listener, SshPort, SshTunnelDirection, StreamRoute, WhitelistEntry,
};
pub use model::{canonical_ip, unix_now};

/// Failure talking to the data store.
#[derive(Debug, Error)]
pub enum DataStoreError {
    /// The store could not be reached or refused the operation.
    #[error("data store unavailable: {0}")]
    Unavailable(String),

    /// A lookup exceeded its deadline.
    #[error("data store lookup timed out after {0:?}")]
    Timeout(Duration),

    /// A single row could not be decoded.
    #[error("corrupt row in {table} (id {id}): {message}")]
    Corrupt {
        table: &'static str,
        id: u32,
        message: String,
    },

    /// The row to update no longer exists.
    #[error("row {id} not found in {table}")]
    RowNotFound { table: &'static str, id: u32 },

    /// Snapshot could not be parsed.
    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("data store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataStoreError {
    /// True when the failure is confined to one row and the rest of the store is usable.
    pub fn is_row_level(&self) -> bool {
        matches!(self, DataStoreError::Corrupt { .. } | DataStoreError::RowNotFound { .. })
    }
}

/// Read interface used by the route compiler.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Every routing row as of one instant. A compile pass reads nothing else.
    async fn read_view(&self) -> Result<RouteView, DataStoreError>;

    async fn list_listeners(&self) -> Result<Vec<Listener>, DataStoreError>;

    async fn list_stream_routes_by_listener(
        &self,
        listen_id: u32,
    ) -> Result<Vec<StreamRoute>, DataStoreError>;

    async fn list_http_routes_by_listener(
        &self,
        listen_id: u32,
    ) -> Result<Vec<HttpRoute>, DataStoreError>;

    async fn get_domain(&self, id: u32) -> Result<Option<Domain>, DataStoreError>;

    async fn get_ssh_port(&self, id: u32) -> Result<Option<SshPort>, DataStoreError>;
}

/// Read/write interface used by the admission oracle.
#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn find_listener(&self, id: u32) -> Result<Option<Listener>, DataStoreError>;

    /// Blacklist row for `ip` with `disabled = false`.
    async fn find_enabled_blacklist_entry(
        &self,
        ip: &str,
    ) -> Result<Option<BlacklistEntry>, DataStoreError>;

    /// Whitelist row for `ip` with `disabled = false`.
    async fn find_enabled_whitelist_entry(
        &self,
        ip: &str,
    ) -> Result<Option<WhitelistEntry>, DataStoreError>;

    /// Bump `count_block` and move `last_block` to `at` (unix seconds).
    async fn increment_block_counter(&self, id: u32, at: u64) -> Result<(), DataStoreError>;

    /// Bump `count_access` and move `last_access` to `at` (unix seconds).
    async fn increment_access_counter(&self, id: u32, at: u64) -> Result<(), DataStoreError>;

    /// Administrator-owned blacklist rows, most recently blocking first.
    async fn list_own_blacklist(&self) -> Result<Vec<BlacklistEntry>, DataStoreError>;
}
