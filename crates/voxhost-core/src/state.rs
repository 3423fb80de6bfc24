//! Observed service state and reconciliation targets.
//!
//! A [`ServiceState`] is always derived from the host at the moment it is
//! needed; nothing in this module is persisted.

use std::fmt;

/// Whether any process matching the service is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// At least one matching process exists.
    Running,
    /// No matching process exists.
    Stopped,
}

/// Result of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// The probe succeeded.
    Healthy,
    /// The probe ran and failed.
    Unhealthy,
    /// The probe was not taken.
    Unknown,
}

/// Registration of the service with the persistent service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutostartStatus {
    /// The unit starts on login.
    Enabled,
    /// The unit exists but does not start on login.
    Disabled,
    /// No unit is known, or the manager could not be asked.
    Absent,
}

/// Snapshot of one service as observed on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceState {
    /// Process-table observation.
    pub process: ProcessState,
    /// Liveness observation.
    pub health: Health,
    /// Autostart registration.
    pub autostart: AutostartStatus,
}

impl ServiceState {
    /// Whether the service answered its liveness probe.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self.health, Health::Healthy)
    }
}

/// Desired end state handed to the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTarget {
    /// Exactly one healthy instance.
    Running,
    /// No matching processes.
    Stopped,
    /// No matching processes and autostart disabled.
    StoppedAndAutostartDisabled,
}

impl ReconcileTarget {
    /// Whether this target also disables autostart.
    #[must_use]
    pub const fn disables_autostart(self) -> bool {
        matches!(self, Self::StoppedAndAutostartDisabled)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for AutostartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "process {}, health {}, autostart {}",
            self.process, self.health, self.autostart
        )
    }
}

impl fmt::Display for ReconcileTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::StoppedAndAutostartDisabled => write!(f, "stopped+disabled"),
        }
    }
}
