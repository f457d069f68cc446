//! Supervisor state machine values.

use std::fmt;

/// Lifecycle of the controlled proxy process.
///
/// `stopped → starting → running → reloading → running → stopping → stopped`,
/// plus `running → crashed` when the process exits on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SupervisorState {
    #[default]
    Stopped,
    Starting,
    Running,
    Reloading,
    Stopping,
    /// Exited without being asked to. Treated as stopped by `start()`.
    Crashed,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Stopped => "stopped",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Reloading => "reloading",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Crashed => "crashed",
        }
    }

    /// Gauge value for `gatehouse_supervisor_state`.
    pub fn code(&self) -> u8 {
        match self {
            SupervisorState::Stopped => 0,
            SupervisorState::Starting => 1,
            SupervisorState::Running => 2,
            SupervisorState::Reloading => 3,
            SupervisorState::Stopping => 4,
            SupervisorState::Crashed => 5,
        }
    }

    /// Serving traffic, possibly mid-reload.
    pub fn is_live(&self) -> bool {
        matches!(self, SupervisorState::Running | SupervisorState::Reloading)
    }

    /// No process is owned in this state.
    pub fn is_down(&self) -> bool {
        matches!(self, SupervisorState::Stopped | SupervisorState::Crashed)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
