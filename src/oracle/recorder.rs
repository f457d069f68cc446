//! Deferred access-list counter writes.
//!
//! The decision path only enqueues; a single background task applies the
//! updates with bounded retries. A full queue drops the update.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::CounterConfig;
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::store::AccessStore;

/// A counter bump captured at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdate {
    /// Blacklist hit: `count_block += 1`, `last_block = at`.
    Block { id: u32, at: u64 },
    /// Whitelist hit: `count_access += 1`, `last_access = at`.
    Access { id: u32, at: u64 },
}

impl CounterUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            CounterUpdate::Block { .. } => "block",
            CounterUpdate::Access { .. } => "access",
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            CounterUpdate::Block { id, .. } | CounterUpdate::Access { id, .. } => *id,
        }
    }
}

/// Sending half of the counter queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CounterRecorder {
    tx: mpsc::Sender<CounterUpdate>,
}

impl CounterRecorder {
    /// Start the background writer. It exits once every recorder is dropped
    /// and the queue is drained.
    pub fn spawn(store: Arc<dyn AccessStore>, config: &CounterConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let policy = RetryPolicy::from(config);
        let task = tokio::spawn(run(store, rx, policy));
        (Self { tx }, task)
    }

    /// Enqueue without waiting. Returns `false` if the update was dropped.
    pub fn record(&self, update: CounterUpdate) -> bool {
        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(update)) => {
                tracing::warn!(kind = update.kind(), id = update.id(), "Counter queue full, dropping update");
                metrics::record_counter_write(update.kind(), "dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(update)) => {
                tracing::warn!(kind = update.kind(), id = update.id(), "Counter writer stopped, dropping update");
                metrics::record_counter_write(update.kind(), "dropped");
                false
            }
        }
    }
}

async fn run(store: Arc<dyn AccessStore>, mut rx: mpsc::Receiver<CounterUpdate>, policy: RetryPolicy) {
    while let Some(update) = rx.recv().await {
        apply(store.as_ref(), update, &policy).await;
    }
    tracing::debug!("Counter writer drained");
}

async fn apply(store: &dyn AccessStore, update: CounterUpdate, policy: &RetryPolicy) {
    let result = policy
        .run(move || async move {
            match update {
                CounterUpdate::Block { id, at } => store.increment_block_counter(id, at).await,
                CounterUpdate::Access { id, at } => store.increment_access_counter(id, at).await,
            }
        })
        .await;

    match result {
        Ok(()) => metrics::record_counter_write(update.kind(), "ok"),
        Err((e, attempts)) => {
            tracing::warn!(
                kind = update.kind(),
                id = update.id(),
                attempts,
                error = %e,
                "Counter update failed"
            );
            metrics::record_counter_write(update.kind(), "error");
        }
    }
}
