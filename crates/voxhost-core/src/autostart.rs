//! Registration with the host's persistent service manager.
//!
//! The production registrar drives `systemctl --user`. Enable and disable
//! query the unit state first and only act when the state differs, so both
//! are idempotent; disabling a unit the manager has never heard of succeeds.

use std::io;
use std::process::{Command, Output};

use thiserror::Error;
use tracing::{debug, info};

use crate::state::AutostartStatus;

const AUTOSTART_TARGET: &str = "voxhost_core::autostart";

/// Capability for managing autostart units.
pub trait AutostartRegistrar {
    /// Current registration of `unit`.
    ///
    /// # Errors
    ///
    /// Fails when the manager cannot be reached.
    fn status(&self, unit: &str) -> Result<AutostartStatus, AutostartError>;

    /// Whether `unit` starts on login.
    ///
    /// # Errors
    ///
    /// Fails when the manager cannot be reached.
    fn is_enabled(&self, unit: &str) -> Result<bool, AutostartError>;

    /// Enables `unit`; already enabled units are left alone.
    ///
    /// # Errors
    ///
    /// Fails when the manager cannot be reached or rejects the request.
    fn enable(&self, unit: &str) -> Result<(), AutostartError>;

    /// Disables `unit`; disabled or unknown units are left alone.
    ///
    /// # Errors
    ///
    /// Fails when the manager cannot be reached or rejects the request.
    fn disable(&self, unit: &str) -> Result<(), AutostartError>;

    /// Asks the manager to re-read its unit files.
    ///
    /// # Errors
    ///
    /// Fails when the manager cannot be reached or rejects the request.
    fn reload(&self) -> Result<(), AutostartError>;
}

impl<T: AutostartRegistrar + ?Sized> AutostartRegistrar for &T {
    fn status(&self, unit: &str) -> Result<AutostartStatus, AutostartError> {
        (**self).status(unit)
    }

    fn is_enabled(&self, unit: &str) -> Result<bool, AutostartError> {
        (**self).is_enabled(unit)
    }

    fn enable(&self, unit: &str) -> Result<(), AutostartError> {
        (**self).enable(unit)
    }

    fn disable(&self, unit: &str) -> Result<(), AutostartError> {
        (**self).disable(unit)
    }

    fn reload(&self) -> Result<(), AutostartError> {
        (**self).reload()
    }
}

/// Errors reported by autostart registrars.
#[derive(Debug, Error)]
pub enum AutostartError {
    /// The manager executable could not be run.
    #[error("autostart registrar unavailable: {source}")]
    RegistrarUnavailable {
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },
    /// The manager ran but could not be reached, e.g. no user bus.
    #[error("autostart registrar unreachable: {detail}")]
    RegistrarUnreachable {
        /// Diagnostic printed by the manager.
        detail: String,
    },
    /// The manager rejected a request.
    #[error("`systemctl --user {action}` failed: {detail}")]
    CommandFailed {
        /// Arguments that were passed after `--user`.
        action: String,
        /// Diagnostic printed by the manager.
        detail: String,
    },
}

impl AutostartError {
    /// Whether the manager itself is missing or unreachable.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::RegistrarUnavailable { .. } | Self::RegistrarUnreachable { .. }
        )
    }
}

/// Registrar backed by `systemctl --user`.
#[derive(Debug, Clone)]
pub struct SystemdUserRegistrar {
    program: String,
}

impl Default for SystemdUserRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemdUserRegistrar {
    /// Uses `systemctl` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("systemctl")
    }

    /// Uses an explicit `systemctl` executable.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output, AutostartError> {
        debug!(target: AUTOSTART_TARGET, ?args, "invoking systemctl --user");
        Command::new(&self.program)
            .arg("--user")
            .args(args)
            .output()
            .map_err(|source| AutostartError::RegistrarUnavailable { source })
    }

    fn run_checked(&self, args: &[&str]) -> Result<(), AutostartError> {
        let output = self.run(args)?;
        if output.status.success() {
            return Ok(());
        }
        let detail = summarise(&output);
        if is_unreachable(&detail) {
            return Err(AutostartError::RegistrarUnreachable { detail });
        }
        Err(AutostartError::CommandFailed {
            action: args.join(" "),
            detail,
        })
    }
}

impl AutostartRegistrar for SystemdUserRegistrar {
    fn status(&self, unit: &str) -> Result<AutostartStatus, AutostartError> {
        let output = self.run(&["is-enabled", unit])?;
        parse_is_enabled(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }

    fn is_enabled(&self, unit: &str) -> Result<bool, AutostartError> {
        Ok(self.status(unit)? == AutostartStatus::Enabled)
    }

    fn enable(&self, unit: &str) -> Result<(), AutostartError> {
        if self.is_enabled(unit)? {
            debug!(target: AUTOSTART_TARGET, unit, "unit already enabled");
            return Ok(());
        }
        self.run_checked(&["enable", unit])?;
        info!(target: AUTOSTART_TARGET, unit, "enabled autostart unit");
        Ok(())
    }

    fn disable(&self, unit: &str) -> Result<(), AutostartError> {
        match self.status(unit)? {
            AutostartStatus::Enabled => {
                self.run_checked(&["disable", unit])?;
                info!(target: AUTOSTART_TARGET, unit, "disabled autostart unit");
                Ok(())
            }
            AutostartStatus::Disabled | AutostartStatus::Absent => {
                debug!(target: AUTOSTART_TARGET, unit, "unit not enabled; nothing to disable");
                Ok(())
            }
        }
    }

    fn reload(&self) -> Result<(), AutostartError> {
        self.run_checked(&["daemon-reload"])
    }
}

/// Maps `systemctl is-enabled` output onto an [`AutostartStatus`].
fn parse_is_enabled(stdout: &str, stderr: &str) -> Result<AutostartStatus, AutostartError> {
    match stdout.trim() {
        "enabled" | "enabled-runtime" | "alias" | "static" | "generated" | "transient" => {
            Ok(AutostartStatus::Enabled)
        }
        "disabled" | "masked" | "masked-runtime" | "indirect" | "linked" | "linked-runtime" => {
            Ok(AutostartStatus::Disabled)
        }
        "not-found" => Ok(AutostartStatus::Absent),
        _ => {
            let detail = stderr.trim();
            let lowered = detail.to_ascii_lowercase();
            if detail.is_empty()
                || lowered.contains("no such file")
                || lowered.contains("not found")
            {
                Ok(AutostartStatus::Absent)
            } else {
                Err(AutostartError::RegistrarUnreachable {
                    detail: detail.to_owned(),
                })
            }
        }
    }
}

fn is_unreachable(detail: &str) -> bool {
    let lowered = detail.to_ascii_lowercase();
    lowered.contains("failed to connect to bus") || lowered.contains("no medium found")
}

fn summarise(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        output.status.to_string()
    } else {
        trimmed.to_owned()
    }
}
