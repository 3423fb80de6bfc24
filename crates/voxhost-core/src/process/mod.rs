//! Process-table queries and process lifecycle control.
//!
//! [`ProcessController`] is the capability the reconciliation engine uses to
//! find, stop and start service processes. The production implementation,
//! [`SystemProcessController`], matches command lines from a fresh
//! [`ProcessTable`] snapshot on every call and never caches pids.
//!
//! Started processes are detached: they run in their own process group with
//! stdin closed and their output appended to the service log, and the
//! controller never waits on them. They keep running after voxhost exits.

mod table;

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::service::{LaunchCommand, ProcessMatcher, StopPolicy};

pub use table::{ProcessEntry, ProcessTable};

pub(crate) const PROCESS_TARGET: &str = "voxhost_core::process";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const FORCED_EXIT_WAIT: Duration = Duration::from_secs(1);

/// Capability for querying and mutating service processes.
pub trait ProcessController {
    /// Pids of live processes matching `matcher`, never including voxhost
    /// itself or its parent.
    fn matching(&self, matcher: &ProcessMatcher) -> Vec<u32>;

    /// Whether any process matches.
    fn is_running(&self, matcher: &ProcessMatcher) -> bool {
        !self.matching(matcher).is_empty()
    }

    /// Stops every matching process: graceful signal, wait up to the grace
    /// period, forced signal to survivors. No matches is a successful no-op.
    fn stop(&self, matcher: &ProcessMatcher, policy: &StopPolicy) -> StopReport;

    /// Spawns `command` detached and returns without waiting for it.
    ///
    /// # Errors
    ///
    /// Fails when the environment file cannot be parsed, when the log file
    /// cannot be opened, or when the OS refuses to create the process.
    fn start(&self, command: &LaunchCommand) -> Result<LaunchHandle, ProcessError>;
}

/// Summary of one stop request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Processes that received the graceful signal.
    pub signalled: usize,
    /// Processes that needed the forced signal.
    pub forced: usize,
    /// Pids still matching after the forced signal.
    pub survivors: Vec<u32>,
}

impl StopReport {
    /// Whether no matching process survived.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.survivors.is_empty()
    }
}

/// Handle to a detached process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchHandle {
    /// Pid reported by the OS at spawn time.
    pub pid: u32,
}

/// Errors raised while starting a process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The OS refused to create the process.
    #[error("failed to launch '{program}': {source}")]
    LaunchFailed {
        /// Program that could not be spawned.
        program: Utf8PathBuf,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },
    /// The environment file exists but could not be parsed.
    #[error("failed to read environment file '{path}': {source}")]
    EnvFile {
        /// Environment file path.
        path: Utf8PathBuf,
        /// Parser error.
        #[source]
        source: dotenvy::Error,
    },
    /// The log file could not be opened for appending.
    #[error("failed to open log file '{path}': {source}")]
    LogFile {
        /// Log file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Process controller backed by the live process table and POSIX signals.
#[derive(Debug, Clone)]
pub struct SystemProcessController {
    poll_interval: Duration,
}

impl Default for SystemProcessController {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProcessController {
    /// Builds a controller with the default poll interval.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
        }
    }

    fn protected_pids() -> [u32; 2] {
        [std::process::id(), std::os::unix::process::parent_id()]
    }

    /// Polls until nothing matches or `budget` elapses; returns survivors.
    fn wait_for_exit(&self, matcher: &ProcessMatcher, budget: Duration) -> Vec<u32> {
        let deadline = Instant::now() + budget;
        loop {
            let remaining = self.matching(matcher);
            if remaining.is_empty() || Instant::now() >= deadline {
                return remaining;
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl ProcessController for SystemProcessController {
    fn matching(&self, matcher: &ProcessMatcher) -> Vec<u32> {
        ProcessTable::capture().matching(matcher, &Self::protected_pids())
    }

    fn stop(&self, matcher: &ProcessMatcher, policy: &StopPolicy) -> StopReport {
        let targets = self.matching(matcher);
        if targets.is_empty() {
            debug!(target: PROCESS_TARGET, "no matching processes to stop");
            return StopReport::default();
        }
        info!(
            target: PROCESS_TARGET,
            pids = ?targets,
            signal = ?policy.graceful,
            "stopping matching processes"
        );
        for pid in &targets {
            send_signal(*pid, policy.graceful);
        }

        let mut survivors = self.wait_for_exit(matcher, policy.grace);
        let mut forced = 0;
        if !survivors.is_empty() {
            warn!(
                target: PROCESS_TARGET,
                pids = ?survivors,
                grace_ms = policy.grace.as_millis(),
                signal = ?policy.forced,
                "processes outlived the grace period"
            );
            for pid in &survivors {
                send_signal(*pid, policy.forced);
            }
            forced = survivors.len();
            survivors = self.wait_for_exit(matcher, FORCED_EXIT_WAIT);
        }

        StopReport {
            signalled: targets.len(),
            forced,
            survivors,
        }
    }

    fn start(&self, command: &LaunchCommand) -> Result<LaunchHandle, ProcessError> {
        let mut process = Command::new(command.program().as_std_path());
        process
            .args(command.arguments())
            .stdin(Stdio::null())
            .process_group(0);
        if let Some(dir) = command.working_dir() {
            process.current_dir(dir.as_std_path());
        }
        if let Some(path) = command.environment_file() {
            for (key, value) in read_env_file(path)? {
                process.env(key, value);
            }
        }
        for (key, value) in command.env_overrides() {
            process.env(key, value);
        }
        match command.output_log() {
            Some(path) => {
                let log = open_log(path)?;
                let stderr = log.try_clone().map_err(|source| ProcessError::LogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
                process.stdout(log).stderr(stderr);
            }
            None => {
                process.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let child = process
            .spawn()
            .map_err(|source| ProcessError::LaunchFailed {
                program: command.program().to_path_buf(),
                source,
            })?;
        let handle = LaunchHandle { pid: child.id() };
        info!(
            target: PROCESS_TARGET,
            pid = handle.pid,
            command = %command.display_line(),
            "launched detached process"
        );
        // Dropping the handle neither kills nor waits on the child.
        drop(child);
        Ok(handle)
    }
}

fn send_signal(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        warn!(target: PROCESS_TARGET, pid, "pid out of range; not signalled");
        return;
    };
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => warn!(
            target: PROCESS_TARGET,
            pid,
            signal = ?signal,
            error = %errno,
            "failed to signal process"
        ),
    }
}

/// Reads `KEY=value` pairs; a missing file yields no pairs.
pub(crate) fn read_env_file(path: &Utf8Path) -> Result<Vec<(String, String)>, ProcessError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let to_error = |source| ProcessError::EnvFile {
        path: path.to_path_buf(),
        source,
    };
    dotenvy::from_path_iter(path.as_std_path())
        .map_err(to_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(to_error)
}

fn open_log(path: &Utf8Path) -> Result<File, ProcessError> {
    let to_error = |source| ProcessError::LogFile {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(to_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_error)
}
