//! Stops every managed service, optionally disabling autostart.

use tracing::info;

use super::{OutcomeLog, RunReport, convergence_outcome, service_report};
use crate::autostart::AutostartRegistrar;
use crate::engine::ReconcileEngine;
use crate::probe::HealthProbe;
use crate::process::ProcessController;
use crate::service::ServiceSet;
use crate::state::ReconcileTarget;

/// Teardown pipeline: one critical `stop:<service>` step per service.
pub struct TeardownWorkflow<'a, H, P, R> {
    engine: &'a ReconcileEngine<'a, H, P, R>,
    services: &'a ServiceSet,
    disable: bool,
}

impl<'a, H, P, R> TeardownWorkflow<'a, H, P, R>
where
    H: HealthProbe,
    P: ProcessController,
    R: AutostartRegistrar,
{
    /// Builds the workflow; `disable` also turns autostart off.
    #[must_use]
    pub const fn new(
        engine: &'a ReconcileEngine<'a, H, P, R>,
        services: &'a ServiceSet,
        disable: bool,
    ) -> Self {
        Self {
            engine,
            services,
            disable,
        }
    }

    /// Target each service is driven to.
    #[must_use]
    pub const fn target(&self) -> ReconcileTarget {
        if self.disable {
            ReconcileTarget::StoppedAndAutostartDisabled
        } else {
            ReconcileTarget::Stopped
        }
    }

    /// Stops every service in order and returns the report.
    pub fn run(&self) -> RunReport {
        let target = self.target();
        info!(target: "voxhost_core::workflow", %target, "teardown starting");
        let mut log = OutcomeLog::new();
        let mut services = Vec::new();
        for spec in self.services {
            let convergence = self.engine.converge(spec, target);
            let outcome = convergence_outcome(format!("stop:{}", spec.name()), &convergence);
            services.push(service_report(
                spec,
                convergence.state,
                outcome.is_critical_failure(),
            ));
            log.record(outcome);
        }
        RunReport::new(log, services)
    }
}
