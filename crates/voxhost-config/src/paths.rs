//! Derives the on-disk layout shared by every voxhost command.
//!
//! The installation root holds one tree per engine, a log directory for the
//! detached service processes, and the environment file read by the service
//! commands. Unit files live in the configured unit directory.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::Config;

const WHISPER_DIR: &str = "whisper.cpp";
const KOKORO_DIR: &str = "kokoro-fastapi";
const LOG_DIR: &str = "logs";
const ENV_FILE: &str = "voxhost.env";

/// Canonical paths for installation artefacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    install_root: Utf8PathBuf,
    whisper_dir: Utf8PathBuf,
    kokoro_dir: Utf8PathBuf,
    log_dir: Utf8PathBuf,
    env_file: Utf8PathBuf,
    unit_dir: Utf8PathBuf,
}

impl InstallPaths {
    /// Derives the layout and creates the root and log directories.
    pub fn from_config(config: &Config) -> Result<Self, InstallPathsError> {
        let paths = Self::from_config_readonly(config);
        for dir in [&paths.install_root, &paths.log_dir] {
            fs::create_dir_all(dir).map_err(|source| InstallPathsError::CreateDirectory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(paths)
    }

    /// Derives the layout without touching the filesystem.
    #[must_use]
    pub fn from_config_readonly(config: &Config) -> Self {
        let root = config.install_root().to_path_buf();
        Self {
            whisper_dir: root.join(WHISPER_DIR),
            kokoro_dir: root.join(KOKORO_DIR),
            log_dir: root.join(LOG_DIR),
            env_file: root.join(ENV_FILE),
            unit_dir: config.unit_dir().to_path_buf(),
            install_root: root,
        }
    }

    /// Root of the installation trees.
    #[must_use]
    pub fn install_root(&self) -> &Utf8Path {
        &self.install_root
    }

    /// whisper.cpp checkout and build tree.
    #[must_use]
    pub fn whisper_dir(&self) -> &Utf8Path {
        &self.whisper_dir
    }

    /// Kokoro FastAPI checkout.
    #[must_use]
    pub fn kokoro_dir(&self) -> &Utf8Path {
        &self.kokoro_dir
    }

    /// Directory receiving per-service log files.
    #[must_use]
    pub fn log_dir(&self) -> &Utf8Path {
        &self.log_dir
    }

    /// Log file for the named service.
    #[must_use]
    pub fn log_file(&self, service: &str) -> Utf8PathBuf {
        self.log_dir.join(format!("{service}.log"))
    }

    /// Key-value environment file passed to the service commands.
    #[must_use]
    pub fn env_file(&self) -> &Utf8Path {
        &self.env_file
    }

    /// Directory holding autostart unit files.
    #[must_use]
    pub fn unit_dir(&self) -> &Utf8Path {
        &self.unit_dir
    }
}

/// Errors raised while preparing the installation layout.
#[derive(Debug, Error)]
pub enum InstallPathsError {
    /// A directory in the layout could not be created.
    #[error("failed to prepare directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
