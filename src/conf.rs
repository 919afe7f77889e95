use crate::analysis::AnalysisSettings;
use crate::protocol::FlagCodes;
use crate::transport::DEFAULT_SOCKET_PATH;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Mailbox socket; `$UID` and `$RUNTIME_DIRECTORY` are expanded
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Capture sample rate in Hz
    /// Falls back to the device default when unsupported
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Preferred audio input device name
    /// If None, uses system default device
    #[serde(default)]
    pub audio_device: Option<String>,

    /// Directory for the capture file
    /// Default is the local data dir, `chirp-auth/recordings`
    #[serde(default)]
    pub recordings_dir: Option<PathBuf>,

    /// Keep the recording and a spectrogram PNG after every attempt
    #[serde(default)]
    pub debug_artifacts: bool,

    /// Default is the local data dir, `chirp-auth/artifacts`
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,

    /// Integer codes of the protocol states, shared with the verifier
    #[serde(default)]
    pub flags: FlagCodes,

    #[serde(default)]
    pub analysis: AnalysisSettings,
}

fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATH.to_string()
}

fn default_sample_rate() -> u32 {
    44100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            sample_rate: default_sample_rate(),
            audio_device: None,
            recordings_dir: None,
            debug_artifacts: false,
            artifacts_dir: None,
            flags: FlagCodes::default(),
            analysis: AnalysisSettings::default(),
        }
    }
}

impl Settings {
    /// Load config from ~/.config/chirp-auth/config.toml
    /// Returns default settings if file doesn't exist or fails to parse
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            tracing::warn!("could not determine config directory, using defaults");
            return Self::default();
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => {
                    tracing::info!(path = %path.display(), "loaded settings");
                    settings
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
        }
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.recordings_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("recordings"))
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.artifacts_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("artifacts"))
    }
}

/// Get the path to the config file: ~/.config/chirp-auth/config.toml
pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "chirp-auth")
}

fn data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("chirp-auth"))
}
