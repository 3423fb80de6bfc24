//! Step outcomes and the run report.

use std::fmt;

use camino::Utf8PathBuf;

use crate::state::ServiceState;

/// Classification of one workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The step did its work.
    Ok,
    /// The step had nothing to do or was not attempted.
    Skipped,
    /// The step hit a problem that does not affect the run's outcome.
    Warn,
    /// The step failed.
    Fail,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Skipped => write!(f, "skipped"),
            Self::Warn => write!(f, "warn"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Result of one workflow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Step name, for example `converge:whisper`.
    pub name: String,
    /// Classification.
    pub status: StepStatus,
    /// Human-readable detail.
    pub message: String,
    /// Whether a failure of this step fails the run.
    pub critical: bool,
}

impl StepOutcome {
    fn new(name: impl Into<String>, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            critical: false,
        }
    }

    /// Successful outcome.
    #[must_use]
    pub fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Ok, message)
    }

    /// Skipped outcome.
    #[must_use]
    pub fn skipped(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Skipped, message)
    }

    /// Advisory outcome.
    #[must_use]
    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Warn, message)
    }

    /// Failed outcome.
    #[must_use]
    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Fail, message)
    }

    /// Marks the step as critical to the run.
    #[must_use]
    pub const fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Whether this outcome fails the run.
    #[must_use]
    pub const fn is_critical_failure(&self) -> bool {
        self.critical && matches!(self.status, StepStatus::Fail)
    }
}

/// Append-only record of step outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeLog {
    outcomes: Vec<StepOutcome>,
}

impl OutcomeLog {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }

    /// Appends an outcome.
    pub fn record(&mut self, outcome: StepOutcome) {
        tracing::debug!(
            target: "voxhost_core::workflow",
            step = %outcome.name,
            status = %outcome.status,
            critical = outcome.critical,
            message = %outcome.message,
            "step recorded"
        );
        self.outcomes.push(outcome);
    }

    /// Outcomes in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter()
    }

    /// Number of outcomes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcome recorded under `name`, if any.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|outcome| outcome.name == name)
    }
}

impl<'a> IntoIterator for &'a OutcomeLog {
    type Item = &'a StepOutcome;
    type IntoIter = std::slice::Iter<'a, StepOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}

/// Overall classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every step succeeded or was skipped.
    Succeeded,
    /// No critical step failed, but something warned or a non-critical step
    /// failed.
    CompletedWithWarnings,
    /// A critical step failed.
    Failed,
}

impl RunStatus {
    /// Classifies a completed log.
    #[must_use]
    pub fn classify(log: &OutcomeLog) -> Self {
        if log.iter().any(StepOutcome::is_critical_failure) {
            Self::Failed
        } else if log
            .iter()
            .any(|outcome| matches!(outcome.status, StepStatus::Warn | StepStatus::Fail))
        {
            Self::CompletedWithWarnings
        } else {
            Self::Succeeded
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::CompletedWithWarnings => write!(f, "completed with warnings"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Final facts about one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReport {
    /// Service name.
    pub name: String,
    /// Autostart unit name.
    pub unit: String,
    /// Log file of the detached process, if any.
    pub log_file: Option<Utf8PathBuf>,
    /// State observed at the end of the run.
    pub state: ServiceState,
    /// Whether a critical step for this service failed.
    pub failed: bool,
}

impl ServiceReport {
    /// Manual commands that help recover a failed service.
    #[must_use]
    pub fn remediation(&self) -> Vec<String> {
        let mut commands = vec![
            format!("systemctl --user restart {}", self.unit),
            format!("journalctl --user -u {} -n 50", self.unit),
        ];
        if let Some(log) = &self.log_file {
            commands.push(format!("tail -n 50 {log}"));
        }
        commands
    }
}

/// The sole artefact of a workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Step outcomes in order.
    pub outcomes: OutcomeLog,
    /// Final per-service facts in declaration order.
    pub services: Vec<ServiceReport>,
    /// Overall classification.
    pub status: RunStatus,
}

impl RunReport {
    /// Builds a report, classifying the log.
    #[must_use]
    pub fn new(outcomes: OutcomeLog, services: Vec<ServiceReport>) -> Self {
        let status = RunStatus::classify(&outcomes);
        Self {
            outcomes,
            services,
            status,
        }
    }

    /// Services whose critical step failed.
    pub fn failed_services(&self) -> impl Iterator<Item = &ServiceReport> {
        self.services.iter().filter(|service| service.failed)
    }
}
