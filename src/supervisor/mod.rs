//! Process supervision subsystem.
//!
//! # Data Flow
//! ```text
//! start():
//!     spawn `binary -p prefix -c main_config -g "daemon off;"`
//!     → waiter task owns the child and publishes its exit
//!     → probe.rs polls (alive + pid file) until the start deadline
//!     → state: starting → running, or killed and rolled back to stopped
//!
//! reload():
//!     optional `binary -t` config test → SIGHUP → running
//!
//! stop(graceful):
//!     SIGQUIT (graceful) / SIGTERM (fast) → wait for exit → SIGKILL on deadline
//! ```
//!
//! # Design Decisions
//! - One operation at a time; start/stop/reload serialize on a mutex
//! - State lives in a watch channel so `is_running()` never blocks
//! - No automatic restart; a crashed proxy stays down until `start()` is called

pub mod probe;
pub mod state;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{watch, Mutex};

use crate::config::SupervisorConfig;
use crate::observability::metrics;

pub use probe::{Exited, ProbeFailure};
pub use state::SupervisorState;

/// How long to wait for the exit after SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("proxy binary not found: {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("failed to spawn proxy: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("proxy did not become live within {0:?}")]
    ProbeTimeout(Duration),

    #[error("proxy exited during startup (exit code {code:?})")]
    ExitedDuringStartup { code: Option<i32> },

    #[error("cannot {op} while {state}")]
    InvalidState {
        op: &'static str,
        state: SupervisorState,
    },

    #[error("proxy configuration test failed: {0}")]
    ConfigTest(String),

    #[error("failed to signal proxy: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error("proxy did not exit within {0:?} and was killed")]
    StopTimeout(Duration),
}

#[derive(Debug)]
struct ChildHandle {
    pid: u32,
    exit: watch::Receiver<Option<Exited>>,
}

impl ChildHandle {
    fn signal(&self, signal: Signal) -> Result<(), SupervisorError> {
        if self.exit.borrow().is_some() {
            return Ok(());
        }
        kill(Pid::from_raw(self.pid as i32), signal)?;
        Ok(())
    }

    /// Wait for the exit, up to `timeout`. Returns false on expiry.
    async fn wait_exit(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.exit.wait_for(Option::is_some))
            .await
            .is_ok()
    }
}

/// Owns the lifecycle of the controlled proxy process.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    state: Arc<watch::Sender<SupervisorState>>,
    child: Mutex<Option<ChildHandle>>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(SupervisorState::Stopped);
        Self {
            config,
            state: Arc::new(state),
            child: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Non-blocking liveness query.
    pub fn is_running(&self) -> bool {
        self.state().is_live()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Pid of the current process, if one is owned.
    pub async fn pid(&self) -> Option<u32> {
        self.child
            .lock()
            .await
            .as_ref()
            .filter(|c| c.exit.borrow().is_none())
            .map(|c| c.pid)
    }

    fn publish(&self, next: SupervisorState) {
        publish(&self.state, next);
    }

    fn pid_file(&self) -> Option<PathBuf> {
        self.config.pid_file.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.config.prefix.join(p)
            }
        })
    }

    fn run_args(&self) -> Vec<String> {
        if let Some(args) = &self.config.args {
            return args.clone();
        }
        vec![
            "-p".to_string(),
            self.config.prefix.display().to_string(),
            "-c".to_string(),
            self.config.main_config.display().to_string(),
            "-g".to_string(),
            "daemon off;".to_string(),
        ]
    }

    fn test_args(&self) -> Vec<String> {
        if let Some(args) = &self.config.test_args {
            return args.clone();
        }
        vec![
            "-p".to_string(),
            self.config.prefix.display().to_string(),
            "-c".to_string(),
            self.config.main_config.display().to_string(),
            "-t".to_string(),
        ]
    }

    fn check_binary(&self) -> Result<(), SupervisorError> {
        let binary = &self.config.binary;
        let is_path = binary.components().count() > 1;
        if is_path && !binary.is_file() {
            return Err(SupervisorError::BinaryNotFound(binary.clone()));
        }
        Ok(())
    }

    /// Launch the proxy and wait for it to become live.
    ///
    /// No-op if already running. On failure the process is killed and the
    /// state rolls back to `stopped`.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let mut slot = self.child.lock().await;
        let current = self.state();
        if current.is_live() {
            tracing::debug!(state = %current, "Proxy already running, start is a no-op");
            return Ok(());
        }

        self.check_binary()?;
        let pid_file = self.pid_file();
        if let Some(path) = &pid_file {
            if path.exists() {
                tracing::warn!(path = %path.display(), "Removing stale pid file");
                let _ = tokio::fs::remove_file(path).await;
            }
        }

        self.publish(SupervisorState::Starting);
        let spawned = Command::new(&self.config.binary)
            .args(self.run_args())
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.publish(SupervisorState::Stopped);
                return Err(if e.kind() == std::io::ErrorKind::NotFound {
                    SupervisorError::BinaryNotFound(self.config.binary.clone())
                } else {
                    SupervisorError::Spawn(e)
                });
            }
        };

        let Some(pid) = child.id() else {
            self.publish(SupervisorState::Stopped);
            let code = child.wait().await.ok().and_then(|s| s.code());
            return Err(SupervisorError::ExitedDuringStartup { code });
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let state = self.state.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(pid, error = %e, "Failed to wait for proxy process");
                    None
                }
            };
            exit_tx.send_replace(Some(Exited { code }));
            on_exit(&state, pid, code);
        });

        let mut handle = ChildHandle { pid, exit: exit_rx };
        tracing::info!(pid, binary = %self.config.binary.display(), "Proxy process spawned");

        let probed = probe::wait_until_live(
            &handle.exit,
            pid_file.as_deref(),
            self.config.probe_interval(),
            self.config.start_timeout(),
        )
        .await;

        match probed {
            Ok(()) => {
                self.publish(SupervisorState::Running);
                tracing::info!(pid, "Proxy is live");
                *slot = Some(handle);
                Ok(())
            }
            Err(ProbeFailure::Exited(exited)) => {
                self.publish(SupervisorState::Stopped);
                tracing::error!(pid, code = ?exited.code, "Proxy exited during startup");
                Err(SupervisorError::ExitedDuringStartup { code: exited.code })
            }
            Err(ProbeFailure::TimedOut) => {
                let _ = handle.signal(Signal::SIGKILL);
                handle.wait_exit(KILL_GRACE).await;
                self.publish(SupervisorState::Stopped);
                tracing::error!(
                    pid,
                    timeout_secs = self.config.start_timeout_secs,
                    "Proxy did not become live, killed"
                );
                Err(SupervisorError::ProbeTimeout(self.config.start_timeout()))
            }
        }
    }

    /// Ask the running proxy to load the freshly compiled configuration.
    ///
    /// Only valid from `running`. Listening sockets stay open; existing
    /// connections drain on the old configuration.
    pub async fn reload(&self) -> Result<(), SupervisorError> {
        let slot = self.child.lock().await;
        let current = self.state();
        let handle = match slot.as_ref() {
            Some(handle) if current == SupervisorState::Running => handle,
            _ => {
                return Err(SupervisorError::InvalidState {
                    op: "reload",
                    state: current,
                })
            }
        };

        if self.config.test_before_reload {
            self.test_config().await?;
        }

        self.publish(SupervisorState::Reloading);
        if let Err(e) = handle.signal(Signal::SIGHUP) {
            self.publish(SupervisorState::Running);
            return Err(e);
        }
        self.state.send_if_modified(|s| {
            if *s == SupervisorState::Reloading {
                *s = SupervisorState::Running;
                true
            } else {
                false
            }
        });
        metrics::record_supervisor_state(self.state().code());
        tracing::info!(pid = handle.pid, "Proxy reload signalled");
        Ok(())
    }

    async fn test_config(&self) -> Result<(), SupervisorError> {
        let output = Command::new(&self.config.binary)
            .args(self.test_args())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(SupervisorError::Spawn)?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::error!(stderr = %stderr, "Proxy rejected the compiled configuration");
        Err(SupervisorError::ConfigTest(stderr))
    }

    /// Stop the proxy and return once it has exited.
    ///
    /// A graceful stop lets connections drain; either way the process is
    /// killed once the stop deadline passes.
    pub async fn stop(&self, graceful: bool) -> Result<(), SupervisorError> {
        let mut slot = self.child.lock().await;
        let Some(mut handle) = slot.take() else {
            self.publish(SupervisorState::Stopped);
            return Ok(());
        };
        if handle.exit.borrow().is_some() {
            self.publish(SupervisorState::Stopped);
            return Ok(());
        }

        self.publish(SupervisorState::Stopping);
        let signal = if graceful { Signal::SIGQUIT } else { Signal::SIGTERM };
        tracing::info!(pid = handle.pid, ?signal, "Stopping proxy");
        if let Err(e) = handle.signal(signal) {
            *slot = Some(handle);
            self.publish(SupervisorState::Running);
            return Err(e);
        }

        let timeout = self.config.stop_timeout();
        if handle.wait_exit(timeout).await {
            self.publish(SupervisorState::Stopped);
            return Ok(());
        }

        tracing::warn!(pid = handle.pid, timeout_secs = timeout.as_secs(), "Proxy did not drain in time, killing");
        handle.signal(Signal::SIGKILL)?;
        handle.wait_exit(KILL_GRACE).await;
        self.publish(SupervisorState::Stopped);
        Err(SupervisorError::StopTimeout(timeout))
    }
}

fn publish(state: &watch::Sender<SupervisorState>, next: SupervisorState) {
    let previous = state.send_replace(next);
    metrics::record_supervisor_state(next.code());
    if previous != next {
        tracing::debug!(from = %previous, to = %next, "Supervisor state changed");
    }
}

fn on_exit(state: &watch::Sender<SupervisorState>, pid: u32, code: Option<i32>) {
    let mut crashed = false;
    let changed = state.send_if_modified(|s| match *s {
        SupervisorState::Running | SupervisorState::Reloading => {
            *s = SupervisorState::Crashed;
            crashed = true;
            true
        }
        SupervisorState::Stopping => {
            *s = SupervisorState::Stopped;
            true
        }
        _ => false,
    });
    if changed {
        metrics::record_supervisor_state(state.borrow().code());
    }
    if crashed {
        tracing::error!(pid, code = ?code, "Proxy exited unexpectedly");
    } else {
        tracing::info!(pid, code = ?code, "Proxy exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> SupervisorConfig {
        SupervisorConfig {
            binary: PathBuf::from("/bin/sh"),
            args: Some(vec!["-c".to_string(), script.to_string()]),
            start_timeout_secs: 2,
            stop_timeout_secs: 2,
            probe_interval_ms: 50,
            test_before_reload: false,
            ..SupervisorConfig::default()
        }
    }

    const SERVE: &str = "trap '' HUP; while :; do sleep 0.1; done";

    #[tokio::test]
    async fn test_start_reload_stop() {
        let supervisor = ProcessSupervisor::new(shell(SERVE));
        assert!(!supervisor.is_running());

        supervisor.start().await.unwrap();
        assert!(supervisor.is_running());
        let pid = supervisor.pid().await.unwrap();

        supervisor.start().await.unwrap();
        assert_eq!(supervisor.pid().await, Some(pid));

        supervisor.reload().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert_eq!(supervisor.pid().await, Some(pid));

        supervisor.stop(true).await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.pid().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let config = SupervisorConfig {
            binary: PathBuf::from("/nonexistent/proxy"),
            ..SupervisorConfig::default()
        };
        let supervisor = ProcessSupervisor::new(config);
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::BinaryNotFound(_)));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_reload_requires_running() {
        let supervisor = ProcessSupervisor::new(shell(SERVE));
        let err = supervisor.reload().await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::InvalidState {
                op: "reload",
                state: SupervisorState::Stopped
            }
        ));
    }

    #[tokio::test]
    async fn test_immediate_exit_fails_start() {
        let supervisor = ProcessSupervisor::new(shell("exit 3"));
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::ExitedDuringStartup { code: Some(3) }
        ));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_probe_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = shell(SERVE);
        config.pid_file = Some(dir.path().join("never.pid"));
        config.start_timeout_secs = 1;

        let supervisor = ProcessSupervisor::new(config);
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::ProbeTimeout(_)));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.pid().await.is_none());
    }

    #[tokio::test]
    async fn test_pid_file_gates_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("proxy.pid");
        let script = format!("echo $$ > {}; {SERVE}", pid_file.display());
        let mut config = shell(&script);
        config.pid_file = Some(pid_file);

        let supervisor = ProcessSupervisor::new(config);
        supervisor.start().await.unwrap();
        assert!(supervisor.is_running());
        supervisor.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_crash_is_observed() {
        let supervisor = ProcessSupervisor::new(shell("sleep 0.5; exit 7"));
        let mut states = supervisor.subscribe();
        supervisor.start().await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == SupervisorState::Crashed),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!supervisor.is_running());

        let err = supervisor.reload().await.unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidState { .. }));

        supervisor.stop(true).await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_deadline_forces_kill() {
        let mut config = shell("trap '' HUP QUIT TERM; while :; do sleep 0.1; done");
        config.stop_timeout_secs = 1;

        let supervisor = ProcessSupervisor::new(config);
        supervisor.start().await.unwrap();

        let err = supervisor.stop(true).await.unwrap_err();
        assert!(matches!(err, SupervisorError::StopTimeout(_)));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }
}
