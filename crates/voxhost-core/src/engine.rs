//! Idempotent convergence of one service towards a target state.
//!
//! [`ReconcileEngine::converge`] reads live state through its collaborators,
//! mutates only when the observation differs from the target, and re-probes to
//! confirm. It never panics and never aborts the run: every problem is
//! returned as data in the [`Convergence`] for the caller to classify.
//!
//! For [`ReconcileTarget::Running`] the engine:
//!
//! 1. probes health and returns immediately when the service is healthy;
//! 2. stops any stale matching processes, then pauses for the settle delay;
//! 3. starts the service detached;
//! 4. polls health at the readiness interval, up to the attempt cap.
//!
//! For the stopped targets it stops every matching process, optionally
//! disables autostart and reloads the manager once, then re-probes.
//!
//! The cancellation token is checked before the start and before every poll.

use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::autostart::AutostartRegistrar;
use crate::cancel::CancellationToken;
use crate::probe::HealthProbe;
use crate::process::{ProcessController, StopReport};
use crate::service::ServiceSpec;
use crate::state::{AutostartStatus, Health, ProcessState, ReconcileTarget, ServiceState};

const ENGINE_TARGET: &str = "voxhost_core::engine";

/// Why a convergence did not reach its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergeFailure {
    /// The OS refused to create the service process.
    LaunchFailed {
        /// Error reported by the process controller.
        detail: String,
    },
    /// The service never became healthy within the readiness budget.
    HealthTimeout {
        /// Polls performed.
        attempts: u32,
    },
    /// A termination signal interrupted the convergence.
    Cancelled,
    /// Matching processes survived the forced stop signal.
    StopIncomplete {
        /// Pids still matching.
        survivors: Vec<u32>,
    },
}

impl fmt::Display for ConvergeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LaunchFailed { detail } => write!(f, "launch failed: {detail}"),
            Self::HealthTimeout { attempts } => {
                write!(f, "not healthy after {attempts} readiness polls")
            }
            Self::Cancelled => write!(f, "cancelled before convergence"),
            Self::StopIncomplete { survivors } => {
                write!(f, "processes survived the forced stop: {survivors:?}")
            }
        }
    }
}

/// Outcome of one [`ReconcileEngine::converge`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence {
    /// Target the engine was driving towards.
    pub target: ReconcileTarget,
    /// State observed when the engine finished.
    pub state: ServiceState,
    /// Readiness polls performed after a start.
    pub polls: u32,
    /// Whether a new process was launched.
    pub started: bool,
    /// Result of the stop phase, when one ran.
    pub stop: Option<StopReport>,
    /// Set when the target was not reached.
    pub failure: Option<ConvergeFailure>,
    /// Registrar problems that did not prevent convergence.
    pub warnings: Vec<String>,
}

impl Convergence {
    /// Whether the target was reached.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        self.failure.is_none()
    }
}

/// Current state plus any registrar trouble met while observing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Observed state.
    pub state: ServiceState,
    /// Registrar problem, when autostart could not be queried.
    pub warning: Option<String>,
}

/// Drives services towards a [`ReconcileTarget`].
#[derive(Debug)]
pub struct ReconcileEngine<'a, H, P, R> {
    probe: &'a H,
    processes: &'a P,
    registrar: &'a R,
    cancel: CancellationToken,
    settle: Duration,
}

impl<'a, H, P, R> ReconcileEngine<'a, H, P, R>
where
    H: HealthProbe,
    P: ProcessController,
    R: AutostartRegistrar,
{
    /// Builds an engine over the given collaborators.
    #[must_use]
    pub const fn new(
        probe: &'a H,
        processes: &'a P,
        registrar: &'a R,
        cancel: CancellationToken,
        settle: Duration,
    ) -> Self {
        Self {
            probe,
            processes,
            registrar,
            cancel,
            settle,
        }
    }

    /// Health probe used by the engine.
    #[must_use]
    pub const fn probe(&self) -> &H {
        self.probe
    }

    /// Process controller used by the engine.
    #[must_use]
    pub const fn processes(&self) -> &P {
        self.processes
    }

    /// Autostart registrar used by the engine.
    #[must_use]
    pub const fn registrar(&self) -> &R {
        self.registrar
    }

    /// Cancellation token checked by the engine.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drives `spec` towards `target`.
    pub fn converge(&self, spec: &ServiceSpec, target: ReconcileTarget) -> Convergence {
        info!(
            target: ENGINE_TARGET,
            service = spec.name(),
            %target,
            "converging service"
        );
        let convergence = match target {
            ReconcileTarget::Running => self.converge_running(spec),
            ReconcileTarget::Stopped | ReconcileTarget::StoppedAndAutostartDisabled => {
                self.converge_stopped(spec, target)
            }
        };
        match &convergence.failure {
            None => info!(
                target: ENGINE_TARGET,
                service = spec.name(),
                state = %convergence.state,
                polls = convergence.polls,
                started = convergence.started,
                "service converged"
            ),
            Some(failure) => warn!(
                target: ENGINE_TARGET,
                service = spec.name(),
                state = %convergence.state,
                %failure,
                "service did not converge"
            ),
        }
        convergence
    }

    /// Observes `spec` without mutating anything.
    pub fn observe(&self, spec: &ServiceSpec) -> Observation {
        let health = self.probe.check(spec);
        self.observe_with(spec, health)
    }

    fn observe_with(&self, spec: &ServiceSpec, health: Health) -> Observation {
        let process = if self.processes.is_running(spec.matcher()) {
            ProcessState::Running
        } else {
            ProcessState::Stopped
        };
        let (autostart, warning) = match self.registrar.status(spec.unit()) {
            Ok(status) => (status, None),
            Err(error) => {
                debug!(
                    target: ENGINE_TARGET,
                    service = spec.name(),
                    %error,
                    "autostart status unavailable"
                );
                (AutostartStatus::Absent, Some(error.to_string()))
            }
        };
        Observation {
            state: ServiceState {
                process,
                health,
                autostart,
            },
            warning,
        }
    }

    fn converge_running(&self, spec: &ServiceSpec) -> Convergence {
        let mut run = Run::new(ReconcileTarget::Running);
        if self.cancel.is_cancelled() {
            return self.finish_cancelled(spec, run);
        }

        let initial = self.probe.check(spec);
        if initial == Health::Healthy {
            debug!(target: ENGINE_TARGET, service = spec.name(), "already healthy");
            return self.finish(spec, run, Health::Healthy);
        }

        let report = self.processes.stop(spec.matcher(), spec.stop_policy());
        let stopped_any = report.signalled > 0;
        let complete = report.is_complete();
        run.stop = Some(report.clone());
        if !complete {
            run.failure = Some(ConvergeFailure::StopIncomplete {
                survivors: report.survivors,
            });
            return self.finish(spec, run, initial);
        }
        if stopped_any {
            debug!(
                target: ENGINE_TARGET,
                service = spec.name(),
                stopped = report.signalled,
                settle_ms = self.settle.as_millis(),
                "stopped stale processes"
            );
            thread::sleep(self.settle);
        }

        if self.cancel.is_cancelled() {
            return self.finish_cancelled(spec, run);
        }
        if let Err(error) = self.processes.start(spec.command()) {
            run.failure = Some(ConvergeFailure::LaunchFailed {
                detail: error.to_string(),
            });
            return self.finish(spec, run, Health::Unhealthy);
        }
        run.started = true;

        let readiness = spec.readiness();
        let mut health = Health::Unhealthy;
        while run.polls < readiness.max_attempts {
            if self.cancel.is_cancelled() {
                return self.finish_cancelled(spec, run);
            }
            thread::sleep(readiness.interval);
            run.polls += 1;
            health = self.probe.check(spec);
            debug!(
                target: ENGINE_TARGET,
                service = spec.name(),
                poll = run.polls,
                %health,
                "readiness poll"
            );
            if health == Health::Healthy {
                return self.finish(spec, run, health);
            }
        }
        run.failure = Some(ConvergeFailure::HealthTimeout {
            attempts: run.polls,
        });
        self.finish(spec, run, health)
    }

    fn converge_stopped(&self, spec: &ServiceSpec, target: ReconcileTarget) -> Convergence {
        let mut run = Run::new(target);
        if self.cancel.is_cancelled() {
            return self.finish_cancelled(spec, run);
        }

        let report = self.processes.stop(spec.matcher(), spec.stop_policy());
        if !report.is_complete() {
            run.failure = Some(ConvergeFailure::StopIncomplete {
                survivors: report.survivors.clone(),
            });
        }
        run.stop = Some(report);

        if target.disables_autostart() {
            if let Err(error) = self.registrar.disable(spec.unit()) {
                run.warnings.push(format!("disable {}: {error}", spec.unit()));
            }
            if let Err(error) = self.registrar.reload() {
                run.warnings.push(format!("reload: {error}"));
            }
        }

        let health = self.probe.check(spec);
        self.finish(spec, run, health)
    }

    fn finish(&self, spec: &ServiceSpec, run: Run, health: Health) -> Convergence {
        let observation = self.observe_with(spec, health);
        run.into_convergence(observation)
    }

    fn finish_cancelled(&self, spec: &ServiceSpec, mut run: Run) -> Convergence {
        info!(target: ENGINE_TARGET, service = spec.name(), "convergence cancelled");
        run.failure = Some(ConvergeFailure::Cancelled);
        self.finish(spec, run, Health::Unknown)
    }
}

/// Bookkeeping accumulated during one convergence.
struct Run {
    target: ReconcileTarget,
    polls: u32,
    started: bool,
    stop: Option<StopReport>,
    failure: Option<ConvergeFailure>,
    warnings: Vec<String>,
}

impl Run {
    const fn new(target: ReconcileTarget) -> Self {
        Self {
            target,
            polls: 0,
            started: false,
            stop: None,
            failure: None,
            warnings: Vec::new(),
        }
    }

    fn into_convergence(self, observation: Observation) -> Convergence {
        let mut warnings = self.warnings;
        warnings.extend(observation.warning);
        Convergence {
            target: self.target,
            state: observation.state,
            polls: self.polls,
            started: self.started,
            stop: self.stop,
            failure: self.failure,
            warnings,
        }
    }
}
