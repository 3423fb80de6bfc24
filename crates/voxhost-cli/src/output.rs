//! Human-readable rendering of run reports and service status.

use std::io::{self, Write};

use voxhost_core::engine::Observation;
use voxhost_core::ServiceSpec;
use voxhost_core::workflow::{RunReport, RunStatus};

/// Writes every step outcome, the per-service summary, remediation hints for
/// failed services and the overall verdict.
pub(crate) fn write_report<W: Write>(
    out: &mut W,
    label: &str,
    report: &RunReport,
) -> io::Result<()> {
    for outcome in &report.outcomes {
        let status = format!("[{}]", outcome.status);
        writeln!(out, "{status:<10}{}: {}", outcome.name, outcome.message)?;
    }

    if !report.services.is_empty() {
        writeln!(out)?;
        for service in &report.services {
            writeln!(out, "{}: {}", service.name, service.state)?;
        }
    }

    for service in report.failed_services() {
        writeln!(out)?;
        writeln!(out, "{} did not converge; to investigate run:", service.name)?;
        for command in service.remediation() {
            writeln!(out, "  {command}")?;
        }
    }

    writeln!(out)?;
    match report.status {
        RunStatus::Succeeded => writeln!(out, "{label} succeeded"),
        RunStatus::CompletedWithWarnings => writeln!(
            out,
            "{label} completed with warnings; review the [warn] and [fail] steps above"
        ),
        RunStatus::Failed => writeln!(out, "{label} failed"),
    }
}

/// Writes one line per service, plus any registrar warning.
pub(crate) fn write_status<W: Write>(
    out: &mut W,
    rows: &[(&ServiceSpec, Observation)],
) -> io::Result<()> {
    for (spec, observation) in rows {
        writeln!(out, "{} ({}): {}", spec.name(), spec.unit(), observation.state)?;
        if let Some(warning) = &observation.warning {
            writeln!(out, "  autostart unknown: {warning}")?;
        }
    }
    Ok(())
}
