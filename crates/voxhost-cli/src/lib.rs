//! Command-line interface runtime for voxhost.
//!
//! The module owns argument parsing, configuration bootstrapping and
//! telemetry installation, then hands the parsed command to the workflow
//! runner. Tests substitute the configuration loader, the IO streams and the
//! command handler so no host state is touched.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use voxhost_config::Config;

mod cli;
mod commands;
mod config;
mod errors;
mod output;
mod telemetry;

use cli::{Cli, CliCommand};
use config::{command_arguments, split_config_arguments};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of `voxhost_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--install-root",
    "--unit-dir",
    "--stt-port",
    "--tts-port",
    "--whisper-model",
    "--threads",
    "--readiness-attempts",
    "--readiness-interval-ms",
    "--probe-timeout-ms",
    "--stop-grace-ms",
    "--settle-ms",
    "--stt-installer",
    "--tts-installer",
    "--uv-bootstrap",
];

/// Bundles the IO streams provided to the CLI runtime.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) const fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

struct CliRunner<'a, 'io, W: Write, E: Write, L: ConfigLoader> {
    io: &'a mut IoStreams<'io, W, E>,
    loader: &'a L,
}

impl<'a, 'io, W, E, L> CliRunner<'a, 'io, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    const fn new(io: &'a mut IoStreams<'io, W, E>, loader: &'a L) -> Self {
        Self { io, loader }
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        self.run_with_handler(args, commands::execute)
    }

    fn run_with_handler<I, F>(&mut self, args: I, mut handler: F) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
        F: FnMut(CliCommand, &Config, &mut IoStreams<'io, W, E>) -> Result<ExitCode, AppError>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&args);

        let cli = match Cli::try_parse_from(command_arguments(&args, &split)) {
            Ok(cli) => cli,
            Err(error) => return self.report_usage(error),
        };

        let result = self
            .loader
            .load(&split.config_arguments)
            .and_then(|config| {
                telemetry::initialise(&config)?;
                Ok(config)
            })
            .and_then(|config| handler(cli.command, &config, self.io));

        match result {
            Ok(exit_code) => exit_code,
            Err(error) => {
                let _ = writeln!(self.io.stderr, "voxhost: {error}");
                ExitCode::FAILURE
            }
        }
    }

    /// Prints help and version requests to stdout; real usage errors go to
    /// stderr and fail the run.
    fn report_usage(&mut self, error: clap::Error) -> ExitCode {
        match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                let _ = write!(self.io.stdout, "{error}");
                ExitCode::SUCCESS
            }
            _ => {
                let _ = write!(self.io.stderr, "{}", AppError::CliUsage(error));
                ExitCode::FAILURE
            }
        }
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdout, stderr);
    CliRunner::new(&mut io, &OrthoConfigLoader).run(args)
}

#[cfg(test)]
mod tests;
