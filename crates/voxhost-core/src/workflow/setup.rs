//! Installs, configures and starts every managed service.

use std::collections::BTreeSet;

use camino::Utf8PathBuf;
use tracing::info;

use super::{OutcomeLog, RunReport, StepOutcome, convergence_outcome, service_report};
use crate::autostart::AutostartRegistrar;
use crate::engine::ReconcileEngine;
use crate::probe::HealthProbe;
use crate::probe::api::{ApiShape, ApiShapeProbe};
use crate::process::ProcessController;
use crate::provision::{InstallStatus, PackageManager, Provisioner, UnitWrite};
use crate::service::{ServiceSet, ServiceSpec};
use crate::state::ReconcileTarget;

const WORKFLOW_TARGET: &str = "voxhost_core::workflow";

/// Host facts the setup workflow needs beyond the service specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupPlan {
    /// Environment file shared by the services.
    pub env_file: Utf8PathBuf,
    /// Directory receiving the autostart units.
    pub unit_dir: Utf8PathBuf,
    /// Recognised environment keys with their defaults.
    pub env_defaults: Vec<(String, String)>,
    /// Shell command installing the package manager when it is missing.
    pub package_bootstrap: Option<String>,
}

/// Setup pipeline: dependencies, package manager, per-service install and
/// library checks, environment file, autostart, convergence, API probes and
/// a final verification.
pub struct SetupWorkflow<'a, H, P, R, V, A> {
    engine: &'a ReconcileEngine<'a, H, P, R>,
    provisioner: &'a V,
    api: &'a A,
    services: &'a ServiceSet,
    plan: SetupPlan,
}

impl<'a, H, P, R, V, A> SetupWorkflow<'a, H, P, R, V, A>
where
    H: HealthProbe,
    P: ProcessController,
    R: AutostartRegistrar,
    V: Provisioner,
    A: ApiShapeProbe,
{
    /// Builds the workflow.
    #[must_use]
    pub const fn new(
        engine: &'a ReconcileEngine<'a, H, P, R>,
        provisioner: &'a V,
        api: &'a A,
        services: &'a ServiceSet,
        plan: SetupPlan,
    ) -> Self {
        Self {
            engine,
            provisioner,
            api,
            services,
            plan,
        }
    }

    /// Runs every step in order and returns the report.
    pub fn run(&self) -> RunReport {
        info!(target: WORKFLOW_TARGET, services = self.services.len(), "setup starting");
        let mut log = OutcomeLog::new();

        log.record(self.guarded("dependencies", || self.check_dependencies()));
        log.record(self.guarded("package-manager", || self.package_manager()));
        for spec in self.services {
            let step = format!("install:{}", spec.name());
            log.record(self.guarded(&step, || self.install(&step, spec)));
        }
        for spec in self.services {
            let step = format!("library-path:{}", spec.name());
            log.record(self.guarded(&step, || self.library_path(&step, spec)));
        }
        log.record(self.guarded("config", || self.env_file()));
        for spec in self.services {
            let step = format!("autostart:{}", spec.name());
            log.record(self.guarded(&step, || self.autostart(&step, spec)));
        }

        let mut failed = Vec::new();
        for spec in self.services {
            let convergence = self.engine.converge(spec, ReconcileTarget::Running);
            let outcome = convergence_outcome(format!("converge:{}", spec.name()), &convergence);
            if outcome.is_critical_failure() {
                failed.push(spec.name().to_owned());
            }
            log.record(outcome);

            if let Some(probe) = spec.api_probe() {
                let step = format!("api:{}", spec.name());
                log.record(if convergence.state.is_healthy() {
                    api_outcome(&step, &self.api.check(probe))
                } else {
                    StepOutcome::skipped(step, "service is not healthy")
                });
            }
        }

        let mut unhealthy = Vec::new();
        let mut services = Vec::new();
        for spec in self.services {
            let observation = self.engine.observe(spec);
            if !observation.state.is_healthy() {
                unhealthy.push(spec.name());
            }
            let is_failed = failed.iter().any(|name| name == spec.name());
            services.push(service_report(spec, observation.state, is_failed));
        }
        log.record(if unhealthy.is_empty() {
            StepOutcome::ok("verify", "all services healthy")
        } else {
            StepOutcome::warn("verify", format!("not healthy: {}", unhealthy.join(", ")))
        });

        let report = RunReport::new(log, services);
        info!(target: WORKFLOW_TARGET, status = %report.status, "setup finished");
        report
    }

    /// Skips non-critical steps once the run has been cancelled.
    fn guarded(&self, step: &str, run: impl FnOnce() -> StepOutcome) -> StepOutcome {
        if self.engine.cancellation().is_cancelled() {
            StepOutcome::skipped(step, "cancelled")
        } else {
            run()
        }
    }

    fn check_dependencies(&self) -> StepOutcome {
        let tools: Vec<String> = self
            .services
            .iter()
            .flat_map(|spec| spec.required_tools().iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if tools.is_empty() {
            return StepOutcome::skipped("dependencies", "no required tools declared");
        }
        let missing = self.provisioner.missing_tools(&tools);
        if missing.is_empty() {
            StepOutcome::ok("dependencies", format!("found {}", tools.join(", ")))
        } else {
            StepOutcome::warn(
                "dependencies",
                format!("missing on PATH: {}", missing.join(", ")),
            )
        }
    }

    fn package_manager(&self) -> StepOutcome {
        let step = "package-manager";
        match self
            .provisioner
            .ensure_package_manager(self.plan.package_bootstrap.as_deref())
        {
            Ok(PackageManager::Present(path)) => StepOutcome::ok(step, format!("found {path}")),
            Ok(PackageManager::Bootstrapped(path)) => {
                StepOutcome::ok(step, format!("installed {path}"))
            }
            Ok(PackageManager::Missing) => {
                StepOutcome::warn(step, "uv not found and no bootstrap hook configured")
            }
            Err(error) => StepOutcome::fail(step, error.to_string()),
        }
    }

    fn install(&self, step: &str, spec: &ServiceSpec) -> StepOutcome {
        let installation = spec.installation();
        let status = self.provisioner.inspect(installation);
        if status == InstallStatus::Complete {
            return StepOutcome::ok(step, "installed");
        }
        let Some(hook) = installation.installer.as_deref() else {
            return StepOutcome::warn(
                step,
                format!("{}; no installer hook configured", describe(&status)),
            );
        };
        match self.provisioner.install(spec, hook) {
            Ok(InstallStatus::Complete) => StepOutcome::ok(step, "installed by hook"),
            Ok(after) => StepOutcome::warn(
                step,
                format!("{} after running the installer hook", describe(&after)),
            ),
            Err(error) => StepOutcome::fail(step, error.to_string()),
        }
    }

    fn library_path(&self, step: &str, spec: &ServiceSpec) -> StepOutcome {
        let installation = spec.installation();
        if installation.lib_dirs.is_empty() {
            return StepOutcome::skipped(step, "no library directories");
        }
        let missing = self.provisioner.missing_lib_dirs(installation);
        if missing.is_empty() {
            StepOutcome::ok(step, "library directories exported via LD_LIBRARY_PATH")
        } else {
            let listed: Vec<&str> = missing.iter().map(|dir| dir.as_str()).collect();
            StepOutcome::warn(step, format!("missing: {}", listed.join(", ")))
        }
    }

    fn env_file(&self) -> StepOutcome {
        let step = "config";
        match self
            .provisioner
            .patch_env_file(&self.plan.env_file, &self.plan.env_defaults)
        {
            Ok(patch) if patch.created => {
                StepOutcome::ok(step, format!("created {}", self.plan.env_file))
            }
            Ok(patch) if patch.added.is_empty() => {
                StepOutcome::ok(step, format!("{} up to date", self.plan.env_file))
            }
            Ok(patch) => StepOutcome::ok(step, format!("added {}", patch.added.join(", "))),
            Err(error) => StepOutcome::fail(step, error.to_string()),
        }
    }

    fn autostart(&self, step: &str, spec: &ServiceSpec) -> StepOutcome {
        let write = match self
            .provisioner
            .install_unit(&self.plan.unit_dir, spec, &self.plan.env_file)
        {
            Ok(write) => write,
            Err(error) => return StepOutcome::warn(step, error.to_string()),
        };
        let registrar = self.engine.registrar();
        if let Err(error) = registrar.enable(spec.unit()) {
            return StepOutcome::warn(step, error.to_string());
        }
        if let Err(error) = registrar.reload() {
            return StepOutcome::warn(step, format!("enabled; reload failed: {error}"));
        }
        let written = match write {
            UnitWrite::Written => "unit written",
            UnitWrite::Unchanged => "unit unchanged",
        };
        StepOutcome::ok(step, format!("{written}; {} enabled", spec.unit()))
    }
}

fn describe(status: &InstallStatus) -> String {
    match status {
        InstallStatus::Complete => "installed".to_owned(),
        InstallStatus::Missing => "not installed".to_owned(),
        InstallStatus::Partial { missing } => {
            let listed: Vec<&str> = missing.iter().map(|path| path.as_str()).collect();
            format!("partial install, reinstall needed (missing {})", listed.join(", "))
        }
    }
}

fn api_outcome(step: &str, shape: &ApiShape) -> StepOutcome {
    match shape {
        ApiShape::Conforms => StepOutcome::ok(step, shape.to_string()),
        ApiShape::Unexpected { .. } | ApiShape::Unreachable { .. } => {
            StepOutcome::warn(step, shape.to_string())
        }
    }
}
