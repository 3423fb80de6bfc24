//! Ordered, best-effort step pipelines.
//!
//! Each step records exactly one [`StepOutcome`] and a failing step never
//! prevents later steps from running. Only steps marked critical can fail the
//! run; everything else degrades it to "completed with warnings".

mod report;
mod setup;
mod teardown;

pub use report::{OutcomeLog, RunReport, RunStatus, ServiceReport, StepOutcome, StepStatus};
pub use setup::{SetupPlan, SetupWorkflow};
pub use teardown::TeardownWorkflow;

use crate::engine::{ConvergeFailure, Convergence};
use crate::service::ServiceSpec;
use crate::state::ServiceState;

/// Maps a convergence onto a critical step outcome.
fn convergence_outcome(step: String, convergence: &Convergence) -> StepOutcome {
    let outcome = match &convergence.failure {
        Some(ConvergeFailure::Cancelled) => StepOutcome::fail(step, "cancelled"),
        Some(failure) => StepOutcome::fail(step, failure.to_string()),
        None => {
            let detail = convergence_detail(convergence);
            if convergence.warnings.is_empty() {
                StepOutcome::ok(step, detail)
            } else {
                StepOutcome::warn(
                    step,
                    format!("{detail}; {}", convergence.warnings.join("; ")),
                )
            }
        }
    };
    outcome.critical()
}

fn convergence_detail(convergence: &Convergence) -> String {
    let stopped = convergence
        .stop
        .as_ref()
        .map_or(0, |report| report.signalled);
    if convergence.started {
        format!("started; healthy after {} poll(s)", convergence.polls)
    } else if convergence.state.is_healthy() && convergence.stop.is_none() {
        "already healthy".to_owned()
    } else if stopped == 0 {
        format!("no running processes; {}", convergence.state)
    } else {
        format!("stopped {stopped} process(es); {}", convergence.state)
    }
}

fn service_report(spec: &ServiceSpec, state: ServiceState, failed: bool) -> ServiceReport {
    ServiceReport {
        name: spec.name().to_owned(),
        unit: spec.unit().to_owned(),
        log_file: spec.command().output_log().map(ToOwned::to_owned),
        state,
        failed,
    }
}
