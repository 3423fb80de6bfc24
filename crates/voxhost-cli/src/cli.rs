//! CLI argument definitions for voxhost.

use clap::{Parser, Subcommand};

/// Installs, starts and stops the local speech services.
#[derive(Parser, Debug)]
#[command(name = "voxhost", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// The workflow to run.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CliCommand {
    /// Installs, configures and starts every service.
    Setup,
    /// Stops every service.
    Teardown {
        /// Also disables autostart for each service.
        #[arg(short = 'd', long)]
        disable: bool,
    },
    /// Prints the live state of every service.
    Status,
}

impl CliCommand {
    /// Name used in report headings.
    pub(crate) const fn label(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Teardown { .. } => "teardown",
            Self::Status => "status",
        }
    }
}
