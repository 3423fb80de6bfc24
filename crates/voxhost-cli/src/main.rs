//! CLI entrypoint for voxhost.
//!
//! The binary delegates to [`voxhost_cli::run`], which loads configuration,
//! installs telemetry, and drives the requested workflow against the host.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    voxhost_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
