//! The two services voxhost manages, derived from configuration.
//!
//! * `whisper`: the whisper.cpp `whisper-server` speech-to-text server.
//! * `kokoro`: the Kokoro FastAPI text-to-speech server under uvicorn.
//!
//! Both listen on loopback only. Each is launched by absolute path with no
//! wrapper process, so one launch is one matching process and the rendered
//! units do not depend on the login `PATH`.

use camino::Utf8PathBuf;
use thiserror::Error;
use voxhost_config::{Config, InstallPaths};

use crate::service::{
    ApiProbe, HealthCheck, Installation, LaunchCommand, ReadinessPolicy, ServiceSet,
    ServiceSetError, ServiceSpec, ServiceSpecError, StopPolicy,
};

/// Name of the speech-to-text service.
pub const WHISPER: &str = "whisper";
/// Name of the text-to-speech service.
pub const KOKORO: &str = "kokoro";

const LOOPBACK: &str = "127.0.0.1";
const TRANSCRIPTION_PATH: &str = "/v1/audio/transcriptions";
const SILENCE_DURATION: &str = "1.0";
const MAX_RECORDING_DURATION: &str = "30";

/// Errors raised while building the service catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A spec was invalid.
    #[error(transparent)]
    Spec(#[from] ServiceSpecError),
    /// The specs could not form a set.
    #[error(transparent)]
    Set(#[from] ServiceSetError),
}

/// Builds the managed services in setup order.
///
/// # Errors
///
/// Fails only when a derived pattern does not compile.
pub fn services(config: &Config, paths: &InstallPaths) -> Result<ServiceSet, CatalogError> {
    Ok(ServiceSet::new(vec![
        whisper(config, paths)?,
        kokoro(config, paths)?,
    ])?)
}

/// Recognised keys of the service environment file with their defaults.
#[must_use]
pub fn env_defaults(config: &Config) -> Vec<(String, String)> {
    [
        ("WHISPER_MODEL", config.whisper_model.clone()),
        ("WHISPER_THREADS", config.threads.to_string()),
        ("STT_PORT", config.stt_port.to_string()),
        ("TTS_PORT", config.tts_port.to_string()),
        ("SILENCE_DURATION", SILENCE_DURATION.to_owned()),
        ("MAX_RECORDING_DURATION", MAX_RECORDING_DURATION.to_owned()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_owned(), value))
    .collect()
}

fn readiness(config: &Config) -> ReadinessPolicy {
    ReadinessPolicy {
        interval: config.readiness_interval(),
        max_attempts: config.readiness_attempts,
    }
}

fn whisper(config: &Config, paths: &InstallPaths) -> Result<ServiceSpec, ServiceSpecError> {
    let dir = paths.whisper_dir();
    let server = dir.join("build/bin/whisper-server");
    let model = Utf8PathBuf::from(format!("models/ggml-{}.bin", config.whisper_model));
    let lib_dirs = vec![dir.join("build/src"), dir.join("build/ggml/src")];
    let library_path = lib_dirs
        .iter()
        .map(|lib| lib.as_str())
        .collect::<Vec<_>>()
        .join(":");
    let port = config.stt_port;

    let command = LaunchCommand::new(server.clone())
        .args(["--host", LOOPBACK, "--port"])
        .arg(port.to_string())
        .arg("-m")
        .arg(model.as_str())
        .arg("-t")
        .arg(config.threads.to_string())
        .args(["--inference-path", TRANSCRIPTION_PATH])
        .workdir(dir)
        .env_file(paths.env_file())
        .env("LD_LIBRARY_PATH", library_path)
        .log_file(paths.log_file(WHISPER));

    ServiceSpec::builder(
        WHISPER,
        command,
        HealthCheck::Http {
            url: format!("http://{LOOPBACK}:{port}/"),
            timeout: config.probe_timeout(),
        },
    )
    .pattern("whisper-server")
    .unit("voxhost-whisper.service")
    .stop_policy(StopPolicy::terminate_then_kill(config.stop_grace()))
    .readiness(readiness(config))
    .installation(Installation {
        artefacts: vec![server, dir.join(&model)],
        installer: config.stt_installer().map(str::to_owned),
        lib_dirs,
    })
    .api_probe(ApiProbe {
        url: format!("http://{LOOPBACK}:{port}{TRANSCRIPTION_PATH}"),
        timeout: config.probe_timeout(),
    })
    .required_tool("git")
    .required_tool("cmake")
    .build()
}

fn kokoro(config: &Config, paths: &InstallPaths) -> Result<ServiceSpec, ServiceSpecError> {
    let dir = paths.kokoro_dir();
    let uvicorn = dir.join(".venv/bin/uvicorn");
    let port = config.tts_port;

    let command = LaunchCommand::new(uvicorn.clone())
        .arg("api.src.main:app")
        .args(["--host", LOOPBACK, "--port"])
        .arg(port.to_string())
        .workdir(dir)
        .env_file(paths.env_file())
        .env("USE_GPU", "false")
        .env("USE_ONNX", "false")
        .env("PYTHONPATH", format!("{dir}:{dir}/api"))
        .env("MODEL_DIR", "src/models")
        .env("VOICES_DIR", "src/voices/v1_0")
        .log_file(paths.log_file(KOKORO));

    ServiceSpec::builder(
        KOKORO,
        command,
        HealthCheck::Http {
            url: format!("http://{LOOPBACK}:{port}/health"),
            timeout: config.probe_timeout(),
        },
    )
    .pattern(format!(r"uvicorn.*--port {port}\b"))
    .pattern(regex::escape(dir.as_str()))
    .unit("voxhost-kokoro.service")
    .stop_policy(StopPolicy::terminate_then_kill(config.stop_grace()))
    .readiness(readiness(config))
    .installation(Installation {
        artefacts: vec![dir.join("api/src/main.py"), uvicorn],
        installer: config.tts_installer().map(str::to_owned),
        lib_dirs: Vec::new(),
    })
    .required_tool("git")
    .required_tool("python3")
    .build()
}
