//! Network helpers.
//!
//! # Design Decisions
//! - TLS for the oracle endpoint is optional; the proxy usually calls it over loopback
//! - Certificates are PEM files loaded once at startup

pub mod tls;

pub use tls::load_tls_config;
