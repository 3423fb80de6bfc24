//! Shared configuration for the voxhost toolchain.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! TOML file (`--config-path` or `VOXHOST_CONFIG_PATH`), then `VOXHOST_*`
//! environment variables, then command-line flags. The resolved [`Config`] is
//! immutable for the rest of a run and is handed to every component by
//! reference.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod logging;
mod paths;

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_READINESS_ATTEMPTS,
    DEFAULT_READINESS_INTERVAL_MS, DEFAULT_SETTLE_MS, DEFAULT_STOP_GRACE_MS, DEFAULT_STT_PORT,
    DEFAULT_TTS_PORT, DEFAULT_WHISPER_MODEL, default_install_root, default_log_filter,
    default_log_filter_string, default_log_format, default_threads, default_unit_dir,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use paths::{InstallPaths, InstallPathsError};

/// Resolved configuration for a voxhost run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "VOXHOST")]
pub struct Config {
    /// `tracing` filter expression, for example `info` or `voxhost_core=debug`.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Log event format.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
    /// Root of the per-service installation trees.
    #[serde(default = "defaults::default_install_root")]
    pub install_root: Utf8PathBuf,
    /// Directory receiving the autostart unit files.
    #[serde(default = "defaults::default_unit_dir")]
    pub unit_dir: Utf8PathBuf,
    /// Port of the speech-to-text server.
    #[serde(default = "defaults::default_stt_port")]
    pub stt_port: u16,
    /// Port of the text-to-speech server.
    #[serde(default = "defaults::default_tts_port")]
    pub tts_port: u16,
    /// Whisper model name, resolved to `models/ggml-<name>.bin`.
    #[serde(default = "defaults::default_whisper_model")]
    pub whisper_model: String,
    /// Inference threads for the speech-to-text server.
    #[serde(default = "defaults::default_threads")]
    pub threads: usize,
    /// Readiness polls attempted after starting a service.
    #[serde(default = "defaults::default_readiness_attempts")]
    pub readiness_attempts: u32,
    /// Delay between readiness polls in milliseconds.
    #[serde(default = "defaults::default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,
    /// Timeout for one HTTP health probe in milliseconds.
    #[serde(default = "defaults::default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Grace period between the graceful and forced stop signals.
    #[serde(default = "defaults::default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Pause after stopping a stale process before starting a new one.
    #[serde(default = "defaults::default_settle_ms")]
    pub settle_ms: u64,
    /// Shell command that installs the speech-to-text engine; empty disables it.
    #[serde(default)]
    pub stt_installer: String,
    /// Shell command that installs the text-to-speech engine; empty disables it.
    #[serde(default)]
    pub tts_installer: String,
    /// Shell command that installs the Python package manager; empty disables it.
    #[serde(default)]
    pub uv_bootstrap: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
            install_root: defaults::default_install_root(),
            unit_dir: defaults::default_unit_dir(),
            stt_port: DEFAULT_STT_PORT,
            tts_port: DEFAULT_TTS_PORT,
            whisper_model: defaults::default_whisper_model(),
            threads: defaults::default_threads(),
            readiness_attempts: DEFAULT_READINESS_ATTEMPTS,
            readiness_interval_ms: DEFAULT_READINESS_INTERVAL_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            settle_ms: DEFAULT_SETTLE_MS,
            stt_installer: String::new(),
            tts_installer: String::new(),
            uv_bootstrap: String::new(),
        }
    }
}

impl Config {
    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Root of the installation trees.
    #[must_use]
    pub fn install_root(&self) -> &Utf8Path {
        &self.install_root
    }

    /// Directory for autostart unit files.
    #[must_use]
    pub fn unit_dir(&self) -> &Utf8Path {
        &self.unit_dir
    }

    /// Delay between readiness polls.
    #[must_use]
    pub const fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    /// Timeout for a single health probe.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Grace period between stop signals.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Pause between stopping and restarting a service.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Installer hook for the speech-to-text engine, if configured.
    #[must_use]
    pub fn stt_installer(&self) -> Option<&str> {
        non_blank(&self.stt_installer)
    }

    /// Installer hook for the text-to-speech engine, if configured.
    #[must_use]
    pub fn tts_installer(&self) -> Option<&str> {
        non_blank(&self.tts_installer)
    }

    /// Package-manager bootstrap hook, if configured.
    #[must_use]
    pub fn uv_bootstrap(&self) -> Option<&str> {
        non_blank(&self.uv_bootstrap)
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_fixed_ports() {
        let config = Config::default();
        assert_eq!(config.stt_port, 2022);
        assert_eq!(config.tts_port, 8880);
        assert_eq!(config.readiness_interval(), Duration::from_secs(1));
    }

    #[test]
    fn blank_hooks_are_disabled() {
        let config = Config {
            stt_installer: String::from("   "),
            tts_installer: String::from(" ./install-kokoro.sh "),
            ..Config::default()
        };
        assert_eq!(config.stt_installer(), None);
        assert_eq!(config.tts_installer(), Some("./install-kokoro.sh"));
        assert_eq!(config.uv_bootstrap(), None);
    }
}
