//! API-shape probe for OpenAI-compatible transcription endpoints.
//!
//! The probe posts a request with no audio attached and expects the server to
//! reject it with an error body. An error response is taken as evidence that
//! the endpoint exists and validates its input. This is an inherited heuristic
//! rather than a conformance test, so its result is advisory and kept apart
//! from liveness.

use std::fmt;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::{PROBE_TARGET, ProbeError, local_client};
use crate::service::ApiProbe;

const MALFORMED_FORM: &str = "model=whisper-1";

/// Verdict of an API-shape probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiShape {
    /// The endpoint rejected the malformed request with an error body.
    Conforms,
    /// The endpoint answered, but not with an error body.
    Unexpected {
        /// HTTP status code returned.
        status: u16,
    },
    /// No HTTP exchange completed.
    Unreachable {
        /// Transport error text.
        detail: String,
    },
}

impl fmt::Display for ApiShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conforms => write!(f, "endpoint rejected a malformed request as expected"),
            Self::Unexpected { status } => write!(
                f,
                "endpoint answered a malformed request without an error (status {status})"
            ),
            Self::Unreachable { detail } => write!(f, "endpoint unreachable: {detail}"),
        }
    }
}

/// Checks that a service exposes the expected API.
pub trait ApiShapeProbe {
    /// Runs the probe described by `probe`.
    fn check(&self, probe: &ApiProbe) -> ApiShape;
}

/// HTTP implementation of [`ApiShapeProbe`].
#[derive(Debug, Clone)]
pub struct HttpApiShapeProbe {
    client: Client,
}

impl HttpApiShapeProbe {
    /// Builds the probe.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Client`] when the HTTP client cannot be built.
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self {
            client: local_client()?,
        })
    }
}

impl ApiShapeProbe for HttpApiShapeProbe {
    fn check(&self, probe: &ApiProbe) -> ApiShape {
        let sent = self
            .client
            .post(&probe.url)
            .timeout(probe.timeout)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(MALFORMED_FORM)
            .send();
        let response = match sent {
            Ok(response) => response,
            Err(error) => {
                return ApiShape::Unreachable {
                    detail: error.to_string(),
                };
            }
        };
        let status = response.status().as_u16();
        let body = match response.text() {
            Ok(body) => body,
            Err(error) => {
                return ApiShape::Unreachable {
                    detail: format!("failed to read response body: {error}"),
                };
            }
        };
        debug!(target: PROBE_TARGET, url = %probe.url, status, "api-shape probe answered");
        classify(status, &body)
    }
}

fn classify(status: u16, body: &str) -> ApiShape {
    if body.to_ascii_lowercase().contains("error") {
        ApiShape::Conforms
    } else {
        ApiShape::Unexpected { status }
    }
}
