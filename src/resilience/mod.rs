//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Deferred store write (counter update):
//!     → retries.rs (classify failure, decide whether to try again)
//!     → backoff.rs (exponential delay with jitter between attempts)
//! ```
//!
//! # Design Decisions
//! - Every retried operation has a bounded number of attempts
//! - Only transient store failures are retried; a missing row never is
//! - Jittered backoff keeps concurrent writers from retrying in lockstep

pub mod backoff;
pub mod retries;

pub use backoff::calculate_backoff;
pub use retries::RetryPolicy;
