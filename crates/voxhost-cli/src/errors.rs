//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use voxhost_config::InstallPathsError;
use voxhost_core::ProbeError;
use voxhost_core::catalog::CatalogError;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to prepare the installation root: {0}")]
    Paths(#[from] InstallPathsError),
    #[error("invalid service definition: {0}")]
    Catalog(#[from] CatalogError),
    #[error("failed to initialise health probes: {0}")]
    Probe(#[from] ProbeError),
    #[error("failed to register signal handlers: {0}")]
    Signals(io::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}
