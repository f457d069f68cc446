//! Start-up liveness probe.

use std::path::Path;
use std::time::Duration;

use tokio::sync::watch;

/// Exit observed by the waiter task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exited {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailure {
    Exited(Exited),
    TimedOut,
}

/// Poll until the process is alive and, when configured, its pid file exists.
///
/// The first check happens one interval after spawn so that an immediate
/// crash is not mistaken for a live process.
pub async fn wait_until_live(
    exit: &watch::Receiver<Option<Exited>>,
    pid_file: Option<&Path>,
    interval: Duration,
    deadline: Duration,
) -> Result<(), ProbeFailure> {
    let poll = async {
        loop {
            tokio::time::sleep(interval).await;
            if let Some(exited) = *exit.borrow() {
                return Err(ProbeFailure::Exited(exited));
            }
            if pid_file.map_or(true, Path::exists) {
                return Ok(());
            }
        }
    };

    match tokio::time::timeout(deadline, poll).await {
        Ok(result) => result,
        Err(_) => Err(ProbeFailure::TimedOut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_reports_exit() {
        let (tx, rx) = watch::channel(None);
        tx.send_replace(Some(Exited { code: Some(1) }));
        let result = wait_until_live(&rx, None, Duration::from_millis(5), Duration::from_secs(1)).await;
        assert_eq!(result, Err(ProbeFailure::Exited(Exited { code: Some(1) })));
    }

    #[tokio::test]
    async fn test_probe_waits_for_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("proxy.pid");
        let (_tx, rx) = watch::channel(None);

        let result = wait_until_live(
            &rx,
            Some(&pid_file),
            Duration::from_millis(5),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(result, Err(ProbeFailure::TimedOut));

        std::fs::write(&pid_file, "1").unwrap();
        let result = wait_until_live(
            &rx,
            Some(&pid_file),
            Duration::from_millis(5),
            Duration::from_millis(500),
        )
        .await;
        assert_eq!(result, Ok(()));
    }
}
