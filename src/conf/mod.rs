//! In-memory model of the controlled proxy's configuration.
//!
//! # Data Flow
//! ```text
//! Route Compiler
//!     → ConfigModel::reset_stream() / reset_http()
//!     → ContextBlock::add_upstream / add_map / add_server (validated on insert)
//!     → render.rs (pure, insertion-ordered serialization)
//!     → text handed back to the compiler for the atomic write
//! ```
//!
//! # Design Decisions
//! - Two independent contexts: `stream` (SNI layer) and `http` (virtual hosts)
//! - Upstreams and maps are keyed by their generated names in insertion order
//! - Invalid pieces are rejected at insert time, before anything reaches disk
//! - No I/O in this module

pub mod context;
pub mod map;
pub mod render;
pub mod server;
pub mod upstream;

use std::fmt;

use thiserror::Error;

pub use context::{ContextBlock, Directive};
pub use map::MapDirective;
pub use server::{ErrorPage, VirtualServer};
pub use upstream::Upstream;

/// Rejected construction of a config model piece.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listen port {port} is not in 1..=65535")]
    InvalidPort { port: i64 },

    #[error("map {variable}: key '{key}' is already bound to '{existing}'")]
    DuplicateMapKey {
        variable: String,
        key: String,
        existing: String,
    },

    #[error("map {variable}: default is already bound to '{existing}'")]
    DuplicateDefault { variable: String, existing: String },

    #[error("map output variable {variable} is declared twice")]
    DuplicateMap { variable: String },

    #[error("empty {what}")]
    Empty { what: &'static str },
}

/// Which top-level block of the proxy configuration a piece belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Stream,
    Http,
}

impl ContextKind {
    /// Name of the enclosing block in the proxy grammar.
    pub fn block_name(&self) -> &'static str {
        match self {
            ContextKind::Stream => "stream",
            ContextKind::Http => "http",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.block_name())
    }
}

/// Full proxy configuration, rebuilt from scratch on every compile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigModel {
    stream: ContextBlock,
    http: ContextBlock,
}

impl Default for ConfigModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigModel {
    pub fn new() -> Self {
        Self {
            stream: ContextBlock::new(ContextKind::Stream),
            http: ContextBlock::new(ContextKind::Http),
        }
    }

    pub fn stream(&self) -> &ContextBlock {
        &self.stream
    }

    pub fn http(&self) -> &ContextBlock {
        &self.http
    }

    pub fn context(&self, kind: ContextKind) -> &ContextBlock {
        match kind {
            ContextKind::Stream => &self.stream,
            ContextKind::Http => &self.http,
        }
    }

    pub fn context_mut(&mut self, kind: ContextKind) -> &mut ContextBlock {
        match kind {
            ContextKind::Stream => &mut self.stream,
            ContextKind::Http => &mut self.http,
        }
    }

    /// Add an upstream group to the stream context.
    ///
    /// Returns `false` if a group with that name already exists; the first
    /// writer keeps the name.
    pub fn add_upstream(&mut self, upstream: Upstream) -> Result<bool, ValidationError> {
        self.stream.add_upstream(upstream)
    }

    /// Add a map to the stream context.
    pub fn add_map(&mut self, map: MapDirective) -> Result<(), ValidationError> {
        self.stream.add_map(map)
    }

    pub fn add_server(
        &mut self,
        kind: ContextKind,
        server: VirtualServer,
    ) -> Result<(), ValidationError> {
        self.context_mut(kind).add_server(server)
    }

    pub fn reset_stream(&mut self) {
        self.stream.reset();
    }

    pub fn reset_http(&mut self) {
        self.http.reset();
    }

    /// Serialize one context to the proxy's native grammar.
    pub fn render(&self, kind: ContextKind) -> String {
        render::render_context(self.context(kind))
    }
}
