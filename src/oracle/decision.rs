//! The admission decision tree.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::observability::metrics;
use crate::oracle::recorder::{CounterRecorder, CounterUpdate};
use crate::store::{canonical_ip, unix_now, AccessStore, AddressCheckMode, DataStoreError};

/// Which proxy context asked. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckKind {
    Stream,
    Http,
    #[default]
    Unknown,
}

impl CheckKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stream" => CheckKind::Stream,
            "http" => CheckKind::Http,
            _ => CheckKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Stream => "stream",
            CheckKind::Http => "http",
            CheckKind::Unknown => "unknown",
        }
    }
}

/// One admission callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// `None` selects the global check. Values outside the store's id range
    /// name no listener and are denied.
    pub listener_id: Option<i64>,
    /// Source address after trusted-proxy unwrapping.
    pub realip_remote_addr: String,
    pub raw_remote_addr: String,
    pub check_kind: CheckKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Deny => "deny",
        }
    }
}

/// Why a verdict was reached; used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    InvalidAddress,
    NotBlacklisted,
    Blacklisted,
    UnknownListener,
    CheckDisabled,
    Whitelisted,
    NotWhitelisted,
    StoreError,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::InvalidAddress => "invalid_address",
            Reason::NotBlacklisted => "not_blacklisted",
            Reason::Blacklisted => "blacklisted",
            Reason::UnknownListener => "unknown_listener",
            Reason::CheckDisabled => "check_disabled",
            Reason::Whitelisted => "whitelisted",
            Reason::NotWhitelisted => "not_whitelisted",
            Reason::StoreError => "store_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub reason: Reason,
}

impl Decision {
    fn allow(reason: Reason) -> Self {
        Self {
            verdict: Verdict::Allow,
            reason,
        }
    }

    fn deny(reason: Reason) -> Self {
        Self {
            verdict: Verdict::Deny,
            reason,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

/// Evaluates admission requests against the access lists.
///
/// Store failures and lookup timeouts deny. Counter updates are queued on the
/// recorder and never awaited.
pub struct AdmissionOracle {
    store: Arc<dyn AccessStore>,
    recorder: CounterRecorder,
    lookup_timeout: Duration,
}

impl AdmissionOracle {
    pub fn new(store: Arc<dyn AccessStore>, recorder: CounterRecorder, lookup_timeout: Duration) -> Self {
        Self {
            store,
            recorder,
            lookup_timeout,
        }
    }

    pub async fn decide(&self, request: &AdmissionRequest) -> Decision {
        let started = Instant::now();
        let decision = match self.evaluate(request).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(
                    listener_id = ?request.listener_id,
                    addr = %request.realip_remote_addr,
                    error = %e,
                    "Access store failed during admission check, denying"
                );
                Decision::deny(Reason::StoreError)
            }
        };

        tracing::info!(
            listener_id = ?request.listener_id,
            addr = %request.realip_remote_addr,
            remote_addr = %request.raw_remote_addr,
            kind = request.check_kind.as_str(),
            verdict = decision.verdict.as_str(),
            reason = decision.reason.as_str(),
            "Admission decision"
        );
        metrics::record_admission(decision.verdict.as_str(), decision.reason.as_str(), started);
        decision
    }

    async fn evaluate(&self, request: &AdmissionRequest) -> Result<Decision, DataStoreError> {
        let Some(ip) = canonical_ip(&request.realip_remote_addr) else {
            tracing::error!(
                addr = %request.realip_remote_addr,
                "Source address is empty or unparseable"
            );
            return Ok(Decision::deny(Reason::InvalidAddress));
        };

        let listener_id = match request.listener_id {
            None | Some(0) => return self.check_blacklist(&ip).await,
            Some(id) => match u32::try_from(id) {
                Ok(id) => id,
                Err(_) => {
                    tracing::warn!(listener_id = id, "Admission check for out-of-range listener id");
                    return Ok(Decision::deny(Reason::UnknownListener));
                }
            },
        };

        let Some(listener) = self.bounded(self.store.find_listener(listener_id)).await? else {
            tracing::warn!(listener_id, "Admission check for unknown listener");
            return Ok(Decision::deny(Reason::UnknownListener));
        };

        if !listener.enable_address_check {
            return Ok(Decision::allow(Reason::CheckDisabled));
        }

        match listener.address_check_mode {
            AddressCheckMode::Blacklist => self.check_blacklist(&ip).await,
            AddressCheckMode::Whitelist => self.check_whitelist(&ip).await,
        }
    }

    /// The blacklist is global; blacklist-mode listeners share it.
    async fn check_blacklist(&self, ip: &str) -> Result<Decision, DataStoreError> {
        let at = unix_now();
        match self.bounded(self.store.find_enabled_blacklist_entry(ip)).await? {
            None => Ok(Decision::allow(Reason::NotBlacklisted)),
            Some(entry) => {
                self.recorder.record(CounterUpdate::Block { id: entry.id, at });
                Ok(Decision::deny(Reason::Blacklisted))
            }
        }
    }

    async fn check_whitelist(&self, ip: &str) -> Result<Decision, DataStoreError> {
        let at = unix_now();
        match self.bounded(self.store.find_enabled_whitelist_entry(ip)).await? {
            None => Ok(Decision::deny(Reason::NotWhitelisted)),
            Some(entry) => {
                self.recorder.record(CounterUpdate::Access { id: entry.id, at });
                Ok(Decision::allow(Reason::Whitelisted))
            }
        }
    }

    async fn bounded<T>(
        &self,
        lookup: impl Future<Output = Result<T, DataStoreError>>,
    ) -> Result<T, DataStoreError> {
        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(DataStoreError::Timeout(self.lookup_timeout)),
        }
    }
}
