//! Service reconciliation for the voxhost speech services.
//!
//! The crate decides, per managed service, whether installation,
//! configuration or a (re)start is needed and drives the service to a
//! converged state with bounded retries. Host access goes through three
//! capability traits so the engine can be exercised against doubles:
//!
//! * [`HealthProbe`]: is the service answering right now?
//! * [`ProcessController`]: find, stop and start service processes.
//! * [`AutostartRegistrar`]: enable, disable and reload autostart units.
//!
//! [`ReconcileEngine`] combines them into `converge(spec, target)`, and the
//! [`workflow`] module strings convergence together with the provisioning
//! steps into the `setup` and `teardown` pipelines.

pub mod autostart;
pub mod cancel;
pub mod catalog;
pub mod engine;
pub mod probe;
pub mod process;
pub mod provision;
pub mod service;
pub mod state;
pub mod workflow;

pub use autostart::{AutostartError, AutostartRegistrar, SystemdUserRegistrar};
pub use cancel::CancellationToken;
pub use engine::{ConvergeFailure, Convergence, Observation, ReconcileEngine};
pub use probe::api::{ApiShape, ApiShapeProbe, HttpApiShapeProbe};
pub use probe::{HealthProbe, ProbeError, SystemHealthProbe};
pub use process::{
    LaunchHandle, ProcessController, ProcessError, StopReport, SystemProcessController,
};
pub use provision::{HostProvisioner, ProvisionError, Provisioner};
pub use service::{
    ApiProbe, HealthCheck, Installation, LaunchCommand, ProcessMatcher, ReadinessPolicy,
    ServiceSet, ServiceSetError, ServiceSpec, ServiceSpecError, StopPolicy,
};
pub use state::{AutostartStatus, Health, ProcessState, ReconcileTarget, ServiceState};
pub use workflow::{
    RunReport, RunStatus, SetupPlan, SetupWorkflow, StepOutcome, StepStatus, TeardownWorkflow,
};

#[cfg(test)]
mod tests;
