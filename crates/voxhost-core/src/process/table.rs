//! Snapshot of the host process table.

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::service::ProcessMatcher;

/// One live process and its joined command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process identifier.
    pub pid: u32,
    /// Arguments joined with single spaces.
    pub command_line: String,
}

/// Point-in-time view of every process with a readable command line.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    entries: Vec<ProcessEntry>,
}

impl ProcessTable {
    /// Reads the live process table.
    ///
    /// Threads and processes without a command line (kernel threads, zombies)
    /// are skipped.
    #[must_use]
    pub fn capture() -> Self {
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind());
        let entries = system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter_map(|(pid, process)| {
                let command_line = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                (!command_line.is_empty()).then(|| ProcessEntry {
                    pid: pid.as_u32(),
                    command_line,
                })
            })
            .collect();
        Self { entries }
    }

    /// Builds a table from known entries.
    #[must_use]
    pub const fn from_entries(entries: Vec<ProcessEntry>) -> Self {
        Self { entries }
    }

    /// Sorted pids whose command line matches, excluding `protected`.
    #[must_use]
    pub fn matching(&self, matcher: &ProcessMatcher, protected: &[u32]) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .entries
            .iter()
            .filter(|entry| !protected.contains(&entry.pid))
            .filter(|entry| matcher.matches(&entry.command_line))
            .map(|entry| entry.pid)
            .collect();
        pids.sort_unstable();
        pids
    }
}

/// Only command lines are read; matching needs nothing else.
fn refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always)
}
