//! Wires the system host capabilities into the core workflows.

use std::io::Write;
use std::process::ExitCode;

use tracing::debug;
use voxhost_config::{Config, InstallPaths};
use voxhost_core::workflow::{RunReport, RunStatus, SetupPlan, SetupWorkflow, TeardownWorkflow};
use voxhost_core::{
    CancellationToken, HostProvisioner, HttpApiShapeProbe, ReconcileEngine, SystemHealthProbe,
    SystemProcessController, SystemdUserRegistrar, catalog,
};

use crate::cli::CliCommand;
use crate::output::{write_report, write_status};
use crate::{AppError, IoStreams};

/// Live host collaborators shared by every command.
struct Host {
    probe: SystemHealthProbe,
    processes: SystemProcessController,
    registrar: SystemdUserRegistrar,
}

impl Host {
    fn new() -> Result<Self, AppError> {
        Ok(Self {
            probe: SystemHealthProbe::new()?,
            processes: SystemProcessController::new(),
            registrar: SystemdUserRegistrar::new(),
        })
    }

    fn engine(
        &self,
        config: &Config,
        cancel: CancellationToken,
    ) -> ReconcileEngine<'_, SystemHealthProbe, SystemProcessController, SystemdUserRegistrar>
    {
        ReconcileEngine::new(
            &self.probe,
            &self.processes,
            &self.registrar,
            cancel,
            config.settle_delay(),
        )
    }
}

/// Runs `command` against the live host.
pub(crate) fn execute<W: Write, E: Write>(
    command: CliCommand,
    config: &Config,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError> {
    debug!(target: "voxhost_cli", command = command.label(), "running command");
    match command {
        CliCommand::Setup => setup(config, io),
        CliCommand::Teardown { disable } => teardown(config, disable, io),
        CliCommand::Status => status(config, io),
    }
}

fn setup<W: Write, E: Write>(
    config: &Config,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError> {
    let paths = InstallPaths::from_config(config)?;
    let services = catalog::services(config, &paths)?;
    let host = Host::new()?;
    let provisioner = HostProvisioner::new(paths.install_root().to_path_buf());
    let api = HttpApiShapeProbe::new()?;
    let cancel = CancellationToken::from_signals().map_err(AppError::Signals)?;
    let engine = host.engine(config, cancel);
    let plan = SetupPlan {
        env_file: paths.env_file().to_path_buf(),
        unit_dir: paths.unit_dir().to_path_buf(),
        env_defaults: catalog::env_defaults(config),
        package_bootstrap: config.uv_bootstrap().map(str::to_owned),
    };

    let report = SetupWorkflow::new(&engine, &provisioner, &api, &services, plan).run();
    finish(CliCommand::Setup, &report, io)
}

fn teardown<W: Write, E: Write>(
    config: &Config,
    disable: bool,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError> {
    let paths = InstallPaths::from_config_readonly(config);
    let services = catalog::services(config, &paths)?;
    let host = Host::new()?;
    let cancel = CancellationToken::from_signals().map_err(AppError::Signals)?;
    let engine = host.engine(config, cancel);

    let report = TeardownWorkflow::new(&engine, &services, disable).run();
    finish(CliCommand::Teardown { disable }, &report, io)
}

fn status<W: Write, E: Write>(
    config: &Config,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError> {
    let paths = InstallPaths::from_config_readonly(config);
    let services = catalog::services(config, &paths)?;
    let host = Host::new()?;
    let engine = host.engine(config, CancellationToken::new());

    let rows: Vec<_> = services
        .iter()
        .map(|spec| (spec, engine.observe(spec)))
        .collect();
    write_status(&mut *io.stdout, &rows)?;
    io.stdout.flush()?;
    Ok(ExitCode::SUCCESS)
}

fn finish<W: Write, E: Write>(
    command: CliCommand,
    report: &RunReport,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError> {
    write_report(&mut *io.stdout, command.label(), report)?;
    io.stdout.flush()?;
    Ok(exit_code(report.status))
}

/// Maps a run classification onto the process exit code.
pub(crate) fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Succeeded | RunStatus::CompletedWithWarnings => ExitCode::SUCCESS,
        RunStatus::Failed => ExitCode::FAILURE,
    }
}
