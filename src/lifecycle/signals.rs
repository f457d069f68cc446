//! OS signal handling.

use tokio::signal::unix::{signal, SignalKind};

use crate::reconcile::{ReconcileHandle, Trigger};

/// Translate signals until a shutdown signal arrives.
///
/// SIGHUP requests a reconcile pass; SIGTERM and SIGINT return.
pub async fn wait_for_shutdown(reconcile: &ReconcileHandle) -> std::io::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, reconciling");
                reconcile.trigger(Trigger::Signal);
            }
            _ = terminate.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                return Ok(());
            }
            _ = interrupt.recv() => {
                tracing::info!("SIGINT received, shutting down");
                return Ok(());
            }
        }
    }
}
