//! Liveness probes.
//!
//! A probe answers one question: is the service up right now? HTTP checks
//! treat any completed exchange as healthy, whatever the status code, because
//! an error page still proves the server is listening. Process-pattern checks
//! consult the process table. Probes never mutate the host.

pub mod api;

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::debug;

use crate::process::{ProcessController, SystemProcessController};
use crate::service::{HealthCheck, ServiceSpec};
use crate::state::Health;

pub(crate) const PROBE_TARGET: &str = "voxhost_core::probe";

/// Observes the liveness of a service.
pub trait HealthProbe {
    /// Probes `spec` once, bounded by its configured timeout.
    fn check(&self, spec: &ServiceSpec) -> Health;
}

impl<T: HealthProbe + ?Sized> HealthProbe for &T {
    fn check(&self, spec: &ServiceSpec) -> Health {
        (**self).check(spec)
    }
}

/// Errors raised while building a probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The HTTP client could not be initialised.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
}

/// Probe backed by a blocking HTTP client and the live process table.
#[derive(Debug, Clone)]
pub struct SystemHealthProbe<P = SystemProcessController> {
    client: Client,
    processes: P,
}

impl SystemHealthProbe {
    /// Builds a probe using the system process controller.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Client`] when the HTTP client cannot be built.
    pub fn new() -> Result<Self, ProbeError> {
        Self::with_processes(SystemProcessController::new())
    }
}

impl<P: ProcessController> SystemHealthProbe<P> {
    /// Builds a probe that answers pattern checks through `processes`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Client`] when the HTTP client cannot be built.
    pub fn with_processes(processes: P) -> Result<Self, ProbeError> {
        Ok(Self {
            client: local_client()?,
            processes,
        })
    }
}

impl<P: ProcessController> HealthProbe for SystemHealthProbe<P> {
    fn check(&self, spec: &ServiceSpec) -> Health {
        match spec.health() {
            HealthCheck::Http { url, timeout } => {
                match self.client.get(url).timeout(*timeout).send() {
                    Ok(response) => {
                        debug!(
                            target: PROBE_TARGET,
                            service = spec.name(),
                            status = response.status().as_u16(),
                            "health endpoint answered"
                        );
                        Health::Healthy
                    }
                    Err(error) => {
                        debug!(
                            target: PROBE_TARGET,
                            service = spec.name(),
                            %error,
                            "health endpoint unreachable"
                        );
                        Health::Unhealthy
                    }
                }
            }
            HealthCheck::ProcessPattern => {
                if self.processes.is_running(spec.matcher()) {
                    Health::Healthy
                } else {
                    Health::Unhealthy
                }
            }
        }
    }
}

/// Client for loopback endpoints; proxies from the environment are ignored.
pub(crate) fn local_client() -> Result<Client, ProbeError> {
    Client::builder()
        .no_proxy()
        .build()
        .map_err(|source| ProbeError::Client { source })
}
