//! Crate-level engine and workflow tests against the in-memory host.

use std::time::Duration;

use mockall::mock;
use mockall::predicate::eq;
use rstest::{fixture, rstest};

use crate::autostart::{AutostartError, AutostartRegistrar};
use crate::cancel::CancellationToken;
use crate::engine::{ConvergeFailure, ReconcileEngine};
use crate::service::{ServiceSet, ServiceSpec};
use crate::state::{AutostartStatus, Health, ProcessState, ReconcileTarget};
use crate::workflow::{RunStatus, SetupPlan, SetupWorkflow, StepStatus, TeardownWorkflow};

use self::support::{FakeHost, spec};

mod support;

const SETTLE: Duration = Duration::from_millis(1);

mock! {
    Registrar {}

    impl AutostartRegistrar for Registrar {
        fn status(&self, unit: &str) -> Result<AutostartStatus, AutostartError>;
        fn is_enabled(&self, unit: &str) -> Result<bool, AutostartError>;
        fn enable(&self, unit: &str) -> Result<(), AutostartError>;
        fn disable(&self, unit: &str) -> Result<(), AutostartError>;
        fn reload(&self) -> Result<(), AutostartError>;
    }
}

#[fixture]
fn whisper() -> ServiceSpec {
    spec("whisper", "/opt/whisper/whisper-server", 5)
}

fn engine(host: &FakeHost) -> ReconcileEngine<'_, FakeHost, FakeHost, FakeHost> {
    ReconcileEngine::new(host, host, host, CancellationToken::new(), SETTLE)
}

fn plan() -> SetupPlan {
    SetupPlan {
        env_file: "/opt/voxhost/voxhost.env".into(),
        unit_dir: "/home/voxhost/.config/systemd/user".into(),
        env_defaults: Vec::new(),
        package_bootstrap: None,
    }
}

#[rstest]
fn converging_a_healthy_service_twice_never_restarts(whisper: ServiceSpec) {
    let host = FakeHost::new();
    host.healthy_after(&whisper, 2);
    let engine = engine(&host);

    let first = engine.converge(&whisper, ReconcileTarget::Running);
    assert!(first.is_converged());
    assert!(first.started);

    let second = engine.converge(&whisper, ReconcileTarget::Running);
    assert!(second.is_converged());
    assert!(!second.started);
    assert_eq!(second.stop, None);
    assert_eq!(host.starts(), 1);
    assert_eq!(host.matching_count(&whisper), 1);
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(3)]
fn restart_leaves_exactly_one_instance(whisper: ServiceSpec, #[case] stale: usize) {
    let host = FakeHost::new();
    host.seed_running(&whisper, stale);
    host.healthy_after(&whisper, 2);

    let convergence = engine(&host).converge(&whisper, ReconcileTarget::Running);

    assert!(convergence.is_converged(), "{:?}", convergence.failure);
    assert_eq!(host.matching_count(&whisper), 1);
    assert_eq!(host.starts(), 1);
    let stopped = convergence.stop.map_or(0, |report| report.signalled);
    assert_eq!(stopped, stale);
    assert_eq!(convergence.state.process, ProcessState::Running);
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(4)]
fn stopping_removes_every_matching_process(whisper: ServiceSpec, #[case] running: usize) {
    let host = FakeHost::new();
    host.seed_running(&whisper, running);

    let convergence = engine(&host).converge(&whisper, ReconcileTarget::Stopped);

    assert!(convergence.is_converged());
    assert_eq!(host.matching_count(&whisper), 0);
    assert_eq!(convergence.state.process, ProcessState::Stopped);
    assert_eq!(convergence.state.health, Health::Unhealthy);
}

#[rstest]
fn surviving_processes_fail_the_stop(whisper: ServiceSpec) {
    let host = FakeHost::new();
    host.seed_running(&whisper, 1);
    host.seed_unkillable(&whisper);

    let convergence = engine(&host).converge(&whisper, ReconcileTarget::Stopped);

    assert!(matches!(
        convergence.failure,
        Some(ConvergeFailure::StopIncomplete { ref survivors }) if survivors.len() == 1
    ));
    assert_eq!(host.matching_count(&whisper), 1);
}

#[rstest]
fn surviving_stale_processes_block_the_start(whisper: ServiceSpec) {
    let host = FakeHost::new();
    host.seed_unkillable(&whisper);

    let convergence = engine(&host).converge(&whisper, ReconcileTarget::Running);

    assert!(matches!(
        convergence.failure,
        Some(ConvergeFailure::StopIncomplete { .. })
    ));
    assert_eq!(host.starts(), 0);
}

#[rstest]
fn disabling_autostart_twice_is_harmless(whisper: ServiceSpec) {
    let host = FakeHost::new();
    host.set_unit(whisper.unit(), AutostartStatus::Enabled);
    let engine = engine(&host);

    let first = engine.converge(&whisper, ReconcileTarget::StoppedAndAutostartDisabled);
    let second = engine.converge(&whisper, ReconcileTarget::StoppedAndAutostartDisabled);

    for convergence in [&first, &second] {
        assert!(convergence.is_converged());
        assert!(convergence.warnings.is_empty(), "{:?}", convergence.warnings);
        assert_eq!(convergence.state.autostart, AutostartStatus::Disabled);
    }
    assert_eq!(host.unit_status(whisper.unit()), AutostartStatus::Disabled);
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(7)]
fn readiness_polling_is_bounded(#[case] max_attempts: u32) {
    let stuck = spec("kokoro", "/opt/kokoro/.venv/bin/uvicorn", max_attempts);
    let host = FakeHost::new();

    let convergence = engine(&host).converge(&stuck, ReconcileTarget::Running);

    assert_eq!(
        convergence.failure,
        Some(ConvergeFailure::HealthTimeout {
            attempts: max_attempts
        })
    );
    assert!(convergence.polls <= max_attempts);
    assert_eq!(convergence.state.health, Health::Unhealthy);
    assert_eq!(convergence.state.process, ProcessState::Running);
}

#[rstest]
fn cancelled_convergence_reports_unknown_health(whisper: ServiceSpec) {
    let host = FakeHost::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let engine = ReconcileEngine::new(&host, &host, &host, cancel, SETTLE);

    let convergence = engine.converge(&whisper, ReconcileTarget::Running);

    assert_eq!(convergence.failure, Some(ConvergeFailure::Cancelled));
    assert_eq!(convergence.state.health, Health::Unknown);
    assert_eq!(host.starts(), 0);
    assert_eq!(host.probes(), 0);
}

#[rstest]
fn launch_failure_is_reported_as_data(whisper: ServiceSpec) {
    let host = FakeHost::new();
    host.make_unlaunchable(&whisper);

    let convergence = engine(&host).converge(&whisper, ReconcileTarget::Running);

    assert!(matches!(
        convergence.failure,
        Some(ConvergeFailure::LaunchFailed { ref detail }) if detail.contains("whisper-server")
    ));
    assert_eq!(convergence.polls, 0);
    assert_eq!(convergence.state.health, Health::Unhealthy);
}

#[rstest]
fn unreachable_registrar_degrades_to_warnings(whisper: ServiceSpec) {
    let host = FakeHost::new();
    host.seed_running(&whisper, 1);
    host.take_registrar_down();

    let convergence =
        engine(&host).converge(&whisper, ReconcileTarget::StoppedAndAutostartDisabled);

    assert!(convergence.is_converged());
    assert_eq!(convergence.state.autostart, AutostartStatus::Absent);
    assert_eq!(convergence.warnings.len(), 3);
    assert_eq!(host.matching_count(&whisper), 0);
}

#[rstest]
fn disabling_calls_the_registrar_once_per_service(whisper: ServiceSpec) {
    let host = FakeHost::new();
    let mut registrar = MockRegistrar::new();
    registrar
        .expect_disable()
        .with(eq("voxhost-whisper.service"))
        .times(1)
        .returning(|_| Ok(()));
    registrar.expect_reload().times(1).returning(|| Ok(()));
    registrar
        .expect_status()
        .returning(|_| Ok(AutostartStatus::Disabled));
    registrar.expect_enable().never();
    let engine = ReconcileEngine::new(
        &host,
        &host,
        &registrar,
        CancellationToken::new(),
        SETTLE,
    );

    let convergence = engine.converge(&whisper, ReconcileTarget::StoppedAndAutostartDisabled);

    assert!(convergence.is_converged());
    assert_eq!(convergence.state.autostart, AutostartStatus::Disabled);
}

#[rstest]
fn plain_stop_leaves_autostart_alone(whisper: ServiceSpec) {
    let host = FakeHost::new();
    let mut registrar = MockRegistrar::new();
    registrar.expect_disable().never();
    registrar.expect_reload().never();
    registrar
        .expect_status()
        .returning(|_| Ok(AutostartStatus::Enabled));
    let engine = ReconcileEngine::new(
        &host,
        &host,
        &registrar,
        CancellationToken::new(),
        SETTLE,
    );

    let convergence = engine.converge(&whisper, ReconcileTarget::Stopped);

    assert!(convergence.is_converged());
    assert_eq!(convergence.state.autostart, AutostartStatus::Enabled);
}

#[rstest]
fn setup_continues_past_a_failed_service() {
    let broken = spec("whisper", "/opt/whisper/missing-server", 3);
    let working = spec("kokoro", "/opt/kokoro/.venv/bin/uvicorn", 3);
    let host = FakeHost::new();
    host.make_unlaunchable(&broken);
    host.healthy_after(&working, 1);
    let services = ServiceSet::new(vec![broken, working]).expect("distinct names");
    let engine = engine(&host);

    let report = SetupWorkflow::new(&engine, &host, &host, &services, plan()).run();

    let converge = report
        .outcomes
        .find("converge:whisper")
        .expect("whisper converge step");
    assert_eq!(converge.status, StepStatus::Fail);
    assert!(converge.critical);
    assert_eq!(
        report.outcomes.find("api:whisper").map(|step| step.status),
        Some(StepStatus::Skipped)
    );
    assert_eq!(
        report.outcomes.find("converge:kokoro").map(|step| step.status),
        Some(StepStatus::Ok)
    );
    assert_eq!(
        report.outcomes.find("api:kokoro").map(|step| step.status),
        Some(StepStatus::Ok)
    );
    assert_eq!(
        report.outcomes.find("verify").map(|step| step.status),
        Some(StepStatus::Warn)
    );
    assert_eq!(report.status, RunStatus::Failed);
    let failed: Vec<&str> = report
        .failed_services()
        .map(|service| service.name.as_str())
        .collect();
    assert_eq!(failed, ["whisper"]);
}

#[rstest]
fn setup_records_every_step_in_order(whisper: ServiceSpec) {
    let host = FakeHost::new();
    host.healthy_after(&whisper, 1);
    let services = ServiceSet::new(vec![whisper]).expect("distinct names");
    let engine = engine(&host);

    let report = SetupWorkflow::new(&engine, &host, &host, &services, plan()).run();

    let steps: Vec<&str> = report
        .outcomes
        .iter()
        .map(|step| step.name.as_str())
        .collect();
    assert_eq!(
        steps,
        [
            "dependencies",
            "package-manager",
            "install:whisper",
            "library-path:whisper",
            "config",
            "autostart:whisper",
            "converge:whisper",
            "api:whisper",
            "verify",
        ]
    );
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(host.unit_status("voxhost-whisper.service"), AutostartStatus::Enabled);
}

#[rstest]
fn cancelled_setup_skips_remaining_work(whisper: ServiceSpec) {
    let host = FakeHost::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let services = ServiceSet::new(vec![whisper]).expect("distinct names");
    let engine = ReconcileEngine::new(&host, &host, &host, cancel, SETTLE);

    let report = SetupWorkflow::new(&engine, &host, &host, &services, plan()).run();

    assert_eq!(
        report.outcomes.find("install:whisper").map(|step| step.status),
        Some(StepStatus::Skipped)
    );
    let converge = report
        .outcomes
        .find("converge:whisper")
        .expect("converge step");
    assert_eq!(converge.message, "cancelled");
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(host.starts(), 0);
}

#[rstest]
#[case(false, ReconcileTarget::Stopped, AutostartStatus::Enabled)]
#[case(true, ReconcileTarget::StoppedAndAutostartDisabled, AutostartStatus::Disabled)]
fn teardown_stops_every_service(
    #[case] disable: bool,
    #[case] target: ReconcileTarget,
    #[case] autostart: AutostartStatus,
) {
    let whisper = spec("whisper", "/opt/whisper/whisper-server", 3);
    let kokoro = spec("kokoro", "/opt/kokoro/.venv/bin/uvicorn", 3);
    let host = FakeHost::new();
    host.seed_running(&whisper, 1);
    host.seed_running(&kokoro, 2);
    host.set_unit(whisper.unit(), AutostartStatus::Enabled);
    host.set_unit(kokoro.unit(), AutostartStatus::Enabled);
    let services = ServiceSet::new(vec![whisper, kokoro]).expect("distinct names");
    let engine = engine(&host);
    let teardown = TeardownWorkflow::new(&engine, &services, disable);
    assert_eq!(teardown.target(), target);

    let report = teardown.run();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.outcomes.len(), 2);
    for service in &report.services {
        assert_eq!(service.state.process, ProcessState::Stopped);
        assert_eq!(service.state.autostart, autostart);
    }
    let expected_disables = if disable { 2 } else { 0 };
    assert_eq!(host.disables(), expected_disables);
    assert_eq!(host.reloads(), expected_disables);
}
