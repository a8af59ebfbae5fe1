//! Service lifecycle states.

/// Operational state of the rates service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Built but not started.
    Starting,
    /// Background refreshes are running.
    Running,
    /// Shutdown signalled, waiting for tasks to finish.
    ShuttingDown,
    /// Every task has finished.
    Stopped,
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }
}
