use std::env;
use std::num::NonZeroUsize;
use std::thread;

use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Port the speech-to-text server listens on.
pub const DEFAULT_STT_PORT: u16 = 2022;

/// Port the text-to-speech server listens on.
pub const DEFAULT_TTS_PORT: u16 = 8880;

/// Whisper model used when none is configured.
pub const DEFAULT_WHISPER_MODEL: &str = "base.en";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Readiness polls attempted after a start before giving up.
pub const DEFAULT_READINESS_ATTEMPTS: u32 = 30;

/// Delay between readiness polls, in milliseconds.
pub const DEFAULT_READINESS_INTERVAL_MS: u64 = 1_000;

/// Upper bound for a single HTTP health probe, in milliseconds.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;

/// Wait between the graceful and forced stop signals, in milliseconds.
pub const DEFAULT_STOP_GRACE_MS: u64 = 3_000;

/// Pause after a stop before the replacement process starts, in milliseconds.
pub const DEFAULT_SETTLE_MS: u64 = 500;

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

pub(crate) fn default_stt_port() -> u16 {
    DEFAULT_STT_PORT
}

pub(crate) fn default_tts_port() -> u16 {
    DEFAULT_TTS_PORT
}

pub(crate) fn default_whisper_model() -> String {
    DEFAULT_WHISPER_MODEL.to_owned()
}

pub(crate) fn default_readiness_attempts() -> u32 {
    DEFAULT_READINESS_ATTEMPTS
}

pub(crate) fn default_readiness_interval_ms() -> u64 {
    DEFAULT_READINESS_INTERVAL_MS
}

pub(crate) fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

pub(crate) fn default_stop_grace_ms() -> u64 {
    DEFAULT_STOP_GRACE_MS
}

pub(crate) fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE_MS
}

/// Worker threads handed to the STT engine: every available core.
pub fn default_threads() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Root of the per-service installation trees.
///
/// Resolves to `<data_local_dir>/voxhost`, falling back to `~/.voxhost` and
/// finally the temporary directory when no home can be determined.
pub fn default_install_root() -> Utf8PathBuf {
    if let Some(path) = dirs::data_local_dir().and_then(utf8) {
        return path.join("voxhost");
    }
    if let Some(path) = dirs::home_dir().and_then(utf8) {
        return path.join(".voxhost");
    }
    fallback_base_directory().join("voxhost")
}

/// Directory holding systemd user units.
pub fn default_unit_dir() -> Utf8PathBuf {
    match dirs::config_dir().and_then(utf8) {
        Some(path) => path.join("systemd").join("user"),
        None => fallback_base_directory().join("systemd").join("user"),
    }
}

fn fallback_base_directory() -> Utf8PathBuf {
    utf8(env::temp_dir()).unwrap_or_else(|| Utf8PathBuf::from("/tmp"))
}

fn utf8(path: std::path::PathBuf) -> Option<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path).ok()
}
