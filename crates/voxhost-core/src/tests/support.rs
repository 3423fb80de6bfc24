//! In-memory host double shared by the engine and workflow tests.
//!
//! `FakeHost` implements every host capability over one `RefCell`ed state so
//! a test can seed processes, script when a service turns healthy, and then
//! count the stops, starts and registrar calls the engine performed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use crate::autostart::{AutostartError, AutostartRegistrar};
use crate::probe::HealthProbe;
use crate::probe::api::{ApiShape, ApiShapeProbe};
use crate::process::{LaunchHandle, ProcessController, ProcessError, StopReport};
use crate::provision::{
    EnvPatch, InstallStatus, PackageManager, ProvisionError, Provisioner, UnitWrite,
};
use crate::service::{
    ApiProbe, HealthCheck, Installation, LaunchCommand, ProcessMatcher, ReadinessPolicy,
    ServiceSpec, StopPolicy,
};
use crate::state::{AutostartStatus, Health};

/// Builds a spec whose program line doubles as its process pattern.
pub(crate) fn spec(name: &str, program: &str, max_attempts: u32) -> ServiceSpec {
    ServiceSpec::builder(
        name,
        LaunchCommand::new(program).args(["--port", "2022"]),
        HealthCheck::Http {
            url: format!("http://127.0.0.1:2022/{name}"),
            timeout: Duration::from_millis(50),
        },
    )
    .pattern(regex::escape(program))
    .unit(format!("voxhost-{name}.service"))
    .stop_policy(StopPolicy::terminate_then_kill(Duration::from_millis(5)))
    .readiness(ReadinessPolicy {
        interval: Duration::from_millis(5),
        max_attempts,
    })
    .installation(Installation {
        artefacts: vec![Utf8PathBuf::from(format!("/opt/{name}/server"))],
        installer: None,
        lib_dirs: Vec::new(),
    })
    .api_probe(ApiProbe {
        url: format!("http://127.0.0.1:2022/{name}/v1/audio/transcriptions"),
        timeout: Duration::from_millis(50),
    })
    .build()
    .expect("valid test spec")
}

#[derive(Debug, Clone)]
struct FakeProcess {
    pid: u32,
    command_line: String,
    ignores_signals: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    /// Probes a running instance needs before it reports healthy.
    healthy_after: Option<u32>,
    /// Probes since the last start.
    checks: u32,
}

#[derive(Debug, Default)]
struct HostState {
    next_pid: u32,
    processes: Vec<FakeProcess>,
    readiness: HashMap<String, Readiness>,
    unlaunchable: Vec<String>,
    units: HashMap<String, AutostartStatus>,
    registrar_down: bool,
    stops: u32,
    starts: u32,
    reloads: u32,
    disables: u32,
    probes: u32,
}

/// Stateful double for every host capability.
#[derive(Debug, Default)]
pub(crate) struct FakeHost {
    state: RefCell<HostState>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self {
            state: RefCell::new(HostState {
                next_pid: 1000,
                ..HostState::default()
            }),
        }
    }

    /// Seeds `count` live instances of `spec`.
    pub(crate) fn seed_running(&self, spec: &ServiceSpec, count: usize) {
        let mut state = self.state.borrow_mut();
        for _ in 0..count {
            state.next_pid += 1;
            let pid = state.next_pid;
            state.processes.push(FakeProcess {
                pid,
                command_line: spec.command().display_line(),
                ignores_signals: false,
            });
        }
    }

    /// Seeds an instance that ignores every signal.
    pub(crate) fn seed_unkillable(&self, spec: &ServiceSpec) {
        let mut state = self.state.borrow_mut();
        state.next_pid += 1;
        let pid = state.next_pid;
        state.processes.push(FakeProcess {
            pid,
            command_line: spec.command().display_line(),
            ignores_signals: true,
        });
    }

    /// Running instances of `spec` report healthy from the `polls`th probe.
    pub(crate) fn healthy_after(&self, spec: &ServiceSpec, polls: u32) {
        self.state
            .borrow_mut()
            .readiness
            .entry(spec.command().display_line())
            .or_default()
            .healthy_after = Some(polls);
    }

    /// Makes starting `spec` fail as if its executable were missing.
    pub(crate) fn make_unlaunchable(&self, spec: &ServiceSpec) {
        self.state
            .borrow_mut()
            .unlaunchable
            .push(spec.command().program().to_string());
    }

    pub(crate) fn set_unit(&self, unit: &str, status: AutostartStatus) {
        self.state.borrow_mut().units.insert(unit.to_owned(), status);
    }

    pub(crate) fn take_registrar_down(&self) {
        self.state.borrow_mut().registrar_down = true;
    }

    pub(crate) fn matching_count(&self, spec: &ServiceSpec) -> usize {
        self.matching(spec.matcher()).len()
    }

    pub(crate) fn unit_status(&self, unit: &str) -> AutostartStatus {
        self.state
            .borrow()
            .units
            .get(unit)
            .copied()
            .unwrap_or(AutostartStatus::Absent)
    }

    pub(crate) fn stops(&self) -> u32 {
        self.state.borrow().stops
    }

    pub(crate) fn starts(&self) -> u32 {
        self.state.borrow().starts
    }

    pub(crate) fn reloads(&self) -> u32 {
        self.state.borrow().reloads
    }

    pub(crate) fn disables(&self) -> u32 {
        self.state.borrow().disables
    }

    pub(crate) fn probes(&self) -> u32 {
        self.state.borrow().probes
    }

    fn registrar_guard(&self) -> Result<(), AutostartError> {
        if self.state.borrow().registrar_down {
            return Err(AutostartError::RegistrarUnreachable {
                detail: "Failed to connect to bus: No medium found".to_owned(),
            });
        }
        Ok(())
    }
}

impl HealthProbe for FakeHost {
    fn check(&self, spec: &ServiceSpec) -> Health {
        let running = self.is_running(spec.matcher());
        let mut state = self.state.borrow_mut();
        state.probes += 1;
        if !running {
            return Health::Unhealthy;
        }
        let readiness = state
            .readiness
            .entry(spec.command().display_line())
            .or_default();
        readiness.checks += 1;
        match readiness.healthy_after {
            Some(polls) if readiness.checks >= polls => Health::Healthy,
            _ => Health::Unhealthy,
        }
    }
}

impl ProcessController for FakeHost {
    fn matching(&self, matcher: &ProcessMatcher) -> Vec<u32> {
        self.state
            .borrow()
            .processes
            .iter()
            .filter(|process| matcher.matches(&process.command_line))
            .map(|process| process.pid)
            .collect()
    }

    fn stop(&self, matcher: &ProcessMatcher, _policy: &StopPolicy) -> StopReport {
        let mut state = self.state.borrow_mut();
        state.stops += 1;
        let targets: Vec<FakeProcess> = state
            .processes
            .iter()
            .filter(|process| matcher.matches(&process.command_line))
            .cloned()
            .collect();
        state
            .processes
            .retain(|process| process.ignores_signals || !matcher.matches(&process.command_line));
        let survivors: Vec<u32> = targets
            .iter()
            .filter(|process| process.ignores_signals)
            .map(|process| process.pid)
            .collect();
        StopReport {
            signalled: targets.len(),
            forced: survivors.len(),
            survivors,
        }
    }

    fn start(&self, command: &LaunchCommand) -> Result<LaunchHandle, ProcessError> {
        let mut state = self.state.borrow_mut();
        if state
            .unlaunchable
            .iter()
            .any(|program| program == command.program().as_str())
        {
            return Err(ProcessError::LaunchFailed {
                program: command.program().to_path_buf(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        state.starts += 1;
        state.next_pid += 1;
        let pid = state.next_pid;
        let command_line = command.display_line();
        state.readiness.entry(command_line.clone()).or_default().checks = 0;
        state.processes.push(FakeProcess {
            pid,
            command_line,
            ignores_signals: false,
        });
        Ok(LaunchHandle { pid })
    }
}

impl AutostartRegistrar for FakeHost {
    fn status(&self, unit: &str) -> Result<AutostartStatus, AutostartError> {
        self.registrar_guard()?;
        Ok(self.unit_status(unit))
    }

    fn is_enabled(&self, unit: &str) -> Result<bool, AutostartError> {
        Ok(self.status(unit)? == AutostartStatus::Enabled)
    }

    fn enable(&self, unit: &str) -> Result<(), AutostartError> {
        self.registrar_guard()?;
        self.set_unit(unit, AutostartStatus::Enabled);
        Ok(())
    }

    fn disable(&self, unit: &str) -> Result<(), AutostartError> {
        self.registrar_guard()?;
        let mut state = self.state.borrow_mut();
        state.disables += 1;
        if let Some(status) = state.units.get_mut(unit) {
            *status = AutostartStatus::Disabled;
        }
        Ok(())
    }

    fn reload(&self) -> Result<(), AutostartError> {
        self.registrar_guard()?;
        self.state.borrow_mut().reloads += 1;
        Ok(())
    }
}

impl Provisioner for FakeHost {
    fn missing_tools(&self, _tools: &[String]) -> Vec<String> {
        Vec::new()
    }

    fn ensure_package_manager(
        &self,
        _bootstrap: Option<&str>,
    ) -> Result<PackageManager, ProvisionError> {
        Ok(PackageManager::Present(Utf8PathBuf::from("/usr/bin/uv")))
    }

    fn inspect(&self, _installation: &Installation) -> InstallStatus {
        InstallStatus::Complete
    }

    fn install(&self, _spec: &ServiceSpec, _hook: &str) -> Result<InstallStatus, ProvisionError> {
        Ok(InstallStatus::Complete)
    }

    fn missing_lib_dirs(&self, _installation: &Installation) -> Vec<Utf8PathBuf> {
        Vec::new()
    }

    fn patch_env_file(
        &self,
        _path: &Utf8Path,
        _defaults: &[(String, String)],
    ) -> Result<EnvPatch, ProvisionError> {
        Ok(EnvPatch::default())
    }

    fn install_unit(
        &self,
        _unit_dir: &Utf8Path,
        spec: &ServiceSpec,
        _env_file: &Utf8Path,
    ) -> Result<UnitWrite, ProvisionError> {
        let mut state = self.state.borrow_mut();
        state
            .units
            .entry(spec.unit().to_owned())
            .or_insert(AutostartStatus::Disabled);
        Ok(UnitWrite::Written)
    }
}

impl ApiShapeProbe for FakeHost {
    fn check(&self, _probe: &ApiProbe) -> ApiShape {
        ApiShape::Conforms
    }
}
