//! Service trait and lifecycle states.

use st_core::error::StResult;

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed, not yet initialized.
    Created,
    /// Running and accepting calls.
    Running,
    /// Shut down; terminal.
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Standard lifecycle for StreamTweaks services.
pub trait Service: Send + Sync {
    /// Human-readable name of this service.
    fn name(&self) -> &str;

    fn state(&self) -> ServiceState;

    /// Called once after construction.
    fn init(&self) -> StResult<()>;

    /// Release every resource. Safe to call more than once.
    fn shutdown(&self) -> StResult<()>;

    fn is_healthy(&self) -> bool {
        self.state() == ServiceState::Running
    }
}
