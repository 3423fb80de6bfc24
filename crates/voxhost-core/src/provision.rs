//! Host provisioning collaborators used by the setup workflow.
//!
//! These operations prepare the ground the engine stands on: executables on
//! `PATH`, the Python package manager, installed artefacts, the environment
//! file and the autostart unit files. Installer hooks are arbitrary shell
//! commands run through `sh -c` to completion; everything else only inspects
//! or appends.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::service::{Installation, LaunchCommand, ServiceSpec};

const PROVISION_TARGET: &str = "voxhost_core::provision";
const PACKAGE_MANAGER: &str = "uv";
const ENV_PROGRAM: &str = "/usr/bin/env";

/// Result of inspecting a service's artefacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    /// Every expected artefact is present.
    Complete,
    /// Some artefacts are present and some are not; needs a reinstall.
    Partial {
        /// Artefacts that are absent.
        missing: Vec<Utf8PathBuf>,
    },
    /// No expected artefact is present.
    Missing,
}

/// Where the package manager came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageManager {
    /// Already available.
    Present(Utf8PathBuf),
    /// Installed by the bootstrap hook during this run.
    Bootstrapped(Utf8PathBuf),
    /// Absent and no bootstrap hook is configured.
    Missing,
}

/// Changes made to the environment file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvPatch {
    /// Whether the file was created.
    pub created: bool,
    /// Keys appended with their default values.
    pub added: Vec<String>,
}

/// Whether a unit file write changed anything on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitWrite {
    /// The file was created or its content replaced.
    Written,
    /// The file already had the rendered content.
    Unchanged,
}

/// Errors raised by provisioning operations.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A hook could not be spawned.
    #[error("failed to run hook '{command}': {source}")]
    HookSpawn {
        /// Shell command.
        command: String,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },
    /// A hook exited unsuccessfully.
    #[error("hook '{command}' failed ({status}): {detail}")]
    HookFailed {
        /// Shell command.
        command: String,
        /// Exit status description.
        status: String,
        /// Last line written to stderr.
        detail: String,
    },
    /// The bootstrap hook ran but the package manager is still not found.
    #[error("'uv' still not found after running the bootstrap hook")]
    StillMissing,
    /// Filesystem access failed.
    #[error("failed to access '{path}': {source}")]
    Io {
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The environment file could not be parsed.
    #[error("failed to parse environment file '{path}': {source}")]
    EnvFile {
        /// Environment file path.
        path: Utf8PathBuf,
        /// Parser error.
        #[source]
        source: dotenvy::Error,
    },
}

/// Provisioning seam between the setup workflow and the host.
pub trait Provisioner {
    /// Names from `tools` that are not executable on `PATH`.
    fn missing_tools(&self, tools: &[String]) -> Vec<String>;

    /// Ensures the Python package manager is available, running `bootstrap`
    /// when it is absent.
    ///
    /// # Errors
    ///
    /// Fails when the bootstrap hook fails or does not produce the tool.
    fn ensure_package_manager(
        &self,
        bootstrap: Option<&str>,
    ) -> Result<PackageManager, ProvisionError>;

    /// Inspects the expected artefacts of `installation`.
    fn inspect(&self, installation: &Installation) -> InstallStatus;

    /// Runs the installer hook of `spec` and re-inspects.
    ///
    /// # Errors
    ///
    /// Fails when the hook cannot be run or exits unsuccessfully.
    fn install(&self, spec: &ServiceSpec, hook: &str) -> Result<InstallStatus, ProvisionError>;

    /// Library directories of `installation` that do not exist.
    fn missing_lib_dirs(&self, installation: &Installation) -> Vec<Utf8PathBuf>;

    /// Creates `path` or appends the `defaults` whose keys are absent.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be parsed or written.
    fn patch_env_file(
        &self,
        path: &Utf8Path,
        defaults: &[(String, String)],
    ) -> Result<EnvPatch, ProvisionError>;

    /// Renders the autostart unit for `spec` into `unit_dir`.
    ///
    /// # Errors
    ///
    /// Fails when the directory or file cannot be written.
    fn install_unit(
        &self,
        unit_dir: &Utf8Path,
        spec: &ServiceSpec,
        env_file: &Utf8Path,
    ) -> Result<UnitWrite, ProvisionError>;
}

/// Provisioner acting on the local host.
#[derive(Debug, Clone)]
pub struct HostProvisioner {
    install_root: Utf8PathBuf,
}

impl HostProvisioner {
    /// Builds a provisioner whose hooks run inside `install_root`.
    #[must_use]
    pub fn new(install_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
        }
    }

    fn run_hook(&self, command: &str) -> Result<(), ProvisionError> {
        info!(target: PROVISION_TARGET, command, "running hook");
        fs::create_dir_all(&self.install_root).map_err(io_error(&self.install_root))?;
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.install_root.as_std_path())
            .env("VOXHOST_INSTALL_ROOT", self.install_root.as_str())
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProvisionError::HookSpawn {
                command: command.to_owned(),
                source,
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ProvisionError::HookFailed {
            command: command.to_owned(),
            status: output.status.to_string(),
            detail: stderr.lines().last().unwrap_or_default().trim().to_owned(),
        })
    }
}

impl Provisioner for HostProvisioner {
    fn missing_tools(&self, tools: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        tools
            .iter()
            .filter(|tool| seen.insert(tool.as_str()))
            .filter(|tool| which::which(tool.as_str()).is_err())
            .cloned()
            .collect()
    }

    fn ensure_package_manager(
        &self,
        bootstrap: Option<&str>,
    ) -> Result<PackageManager, ProvisionError> {
        if let Some(path) = locate_package_manager() {
            return Ok(PackageManager::Present(path));
        }
        let Some(hook) = bootstrap else {
            return Ok(PackageManager::Missing);
        };
        self.run_hook(hook)?;
        locate_package_manager()
            .map(PackageManager::Bootstrapped)
            .ok_or(ProvisionError::StillMissing)
    }

    fn inspect(&self, installation: &Installation) -> InstallStatus {
        inspect_artefacts(&installation.artefacts)
    }

    fn install(&self, spec: &ServiceSpec, hook: &str) -> Result<InstallStatus, ProvisionError> {
        info!(target: PROVISION_TARGET, service = spec.name(), "installing service");
        self.run_hook(hook)?;
        Ok(self.inspect(spec.installation()))
    }

    fn missing_lib_dirs(&self, installation: &Installation) -> Vec<Utf8PathBuf> {
        installation
            .lib_dirs
            .iter()
            .filter(|dir| !dir.is_dir())
            .cloned()
            .collect()
    }

    fn patch_env_file(
        &self,
        path: &Utf8Path,
        defaults: &[(String, String)],
    ) -> Result<EnvPatch, ProvisionError> {
        patch_env_file(path, defaults)
    }

    fn install_unit(
        &self,
        unit_dir: &Utf8Path,
        spec: &ServiceSpec,
        env_file: &Utf8Path,
    ) -> Result<UnitWrite, ProvisionError> {
        fs::create_dir_all(unit_dir).map_err(io_error(unit_dir))?;
        let path = unit_dir.join(spec.unit());
        let rendered = render_unit(spec, env_file);
        match fs::read_to_string(&path) {
            Ok(existing) if existing == rendered => {
                debug!(target: PROVISION_TARGET, unit = spec.unit(), "unit file unchanged");
                return Ok(UnitWrite::Unchanged);
            }
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(io_error(&path)(error)),
        }
        fs::write(&path, rendered).map_err(io_error(&path))?;
        info!(target: PROVISION_TARGET, unit = spec.unit(), %path, "wrote unit file");
        Ok(UnitWrite::Written)
    }
}

fn io_error(path: &Utf8Path) -> impl FnOnce(io::Error) -> ProvisionError + use<> {
    let owned = path.to_path_buf();
    move |source| ProvisionError::Io {
        path: owned,
        source,
    }
}

fn locate_package_manager() -> Option<Utf8PathBuf> {
    if let Ok(path) = which::which(PACKAGE_MANAGER) {
        return Utf8PathBuf::from_path_buf(path).ok();
    }
    let home = std::env::var("HOME").ok()?;
    let home_dir = Utf8PathBuf::from(home);
    [".local/bin", ".cargo/bin"]
        .into_iter()
        .map(|dir| home_dir.join(dir).join(PACKAGE_MANAGER))
        .find(|candidate| candidate.is_file())
}

fn inspect_artefacts(artefacts: &[Utf8PathBuf]) -> InstallStatus {
    let missing: Vec<Utf8PathBuf> = artefacts
        .iter()
        .filter(|artefact| !artefact.exists())
        .cloned()
        .collect();
    if missing.is_empty() {
        InstallStatus::Complete
    } else if missing.len() == artefacts.len() {
        InstallStatus::Missing
    } else {
        InstallStatus::Partial { missing }
    }
}

/// Creates the env file or appends missing keys; existing values are kept.
pub fn patch_env_file(
    path: &Utf8Path,
    defaults: &[(String, String)],
) -> Result<EnvPatch, ProvisionError> {
    let existing = if path.exists() {
        let keys: HashSet<String> = dotenvy::from_path_iter(path.as_std_path())
            .and_then(|iter| iter.map(|pair| pair.map(|(key, _)| key)).collect())
            .map_err(|source| ProvisionError::EnvFile {
                path: path.to_path_buf(),
                source,
            })?;
        Some(keys)
    } else {
        None
    };
    let known: HashSet<String> = existing.clone().unwrap_or_default();

    let mut text = String::new();
    let mut added = Vec::new();
    for (key, value) in defaults {
        if known.contains(key) {
            continue;
        }
        text.push_str(&format!("{key}={value}\n"));
        added.push(key.clone());
    }

    if existing.is_none() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let body = format!("# voxhost service environment\n{text}");
        fs::write(path, body).map_err(io_error(path))?;
        return Ok(EnvPatch {
            created: true,
            added,
        });
    }

    if !added.is_empty() {
        let current = fs::read_to_string(path).map_err(io_error(path))?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(io_error(path))?;
        if !current.is_empty() && !current.ends_with('\n') {
            text.insert(0, '\n');
        }
        file.write_all(text.as_bytes()).map_err(io_error(path))?;
    }
    Ok(EnvPatch {
        created: false,
        added,
    })
}

/// Renders a systemd user unit for `spec`.
///
/// systemd lets `EnvironmentFile=` win over `Environment=`, so explicit
/// overrides are passed through `env` on the `ExecStart=` line instead. The
/// unit then resolves variables the same way a detached start does.
#[must_use]
pub fn render_unit(spec: &ServiceSpec, env_file: &Utf8Path) -> String {
    let mut unit = String::new();
    unit.push_str("[Unit]\n");
    unit.push_str(&format!("Description=voxhost {} service\n", spec.name()));
    unit.push_str("After=network.target\n\n");
    unit.push_str("[Service]\nType=simple\n");
    if let Some(dir) = spec.command().working_dir() {
        unit.push_str(&format!("WorkingDirectory={dir}\n"));
    }
    unit.push_str(&format!("EnvironmentFile=-{env_file}\n"));
    unit.push_str(&format!("ExecStart={}\n", exec_line(spec.command())));
    unit.push_str("Restart=on-failure\nRestartSec=2\n\n");
    unit.push_str("[Install]\nWantedBy=default.target\n");
    unit
}

fn exec_line(command: &LaunchCommand) -> String {
    let mut words = Vec::new();
    if !command.env_overrides().is_empty() {
        words.push(ENV_PROGRAM.to_owned());
        words.extend(
            command
                .env_overrides()
                .iter()
                .map(|(key, value)| quote(&format!("{key}={value}"))),
        );
    }
    words.push(quote(command.program().as_str()));
    words.extend(command.arguments().iter().map(|arg| quote(arg)));
    words.join(" ")
}

/// Double-quotes `value` when systemd would otherwise split or unescape it.
fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'));
    if !needs_quotes {
        return value.to_owned();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
