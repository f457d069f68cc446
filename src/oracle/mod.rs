//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! proxy access hook
//!     → server.rs (GET /njs/address_access, headers → AdmissionRequest)
//!     → decision.rs (address → listener → blacklist / whitelist)
//!     → 200 allow / 401 deny
//!     ⤷ recorder.rs (counter bump queued, applied in the background)
//! ```
//!
//! # Design Decisions
//! - Fail closed: bad addresses, unknown listeners, and store errors all deny
//! - Every store lookup carries its own deadline
//! - The verdict never waits on bookkeeping writes

pub mod decision;
pub mod recorder;
pub mod server;

pub use decision::{AdmissionOracle, AdmissionRequest, CheckKind, Decision, Reason, Verdict};
pub use recorder::{CounterRecorder, CounterUpdate};
pub use server::{build_router, parse_request, ACCESS_PATH, HEALTH_PATH};
