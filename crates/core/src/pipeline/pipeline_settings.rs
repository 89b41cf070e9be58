use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::infrastructure::model_locator::ModelLocator;
use crate::shared::constants::{APP_DIR_NAME, DEFAULT_FRAME_INTERVAL, FACE_MODEL_NAME};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tunables for a [`PipelineController`](super::pipeline_controller::PipelineController)
/// and the default detection service. Missing JSON fields take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Delay after every loop iteration.
    pub frame_interval_ms: u64,
    /// End the loop once the source reports it has no more frames.
    pub stop_on_exhaustion: bool,
    /// Searched before the built-in model locations.
    pub model_dirs: Vec<PathBuf>,
    pub model_file_name: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frame_interval_ms: DEFAULT_FRAME_INTERVAL.as_millis() as u64,
            stop_on_exhaustion: false,
            model_dirs: Vec::new(),
            model_file_name: FACE_MODEL_NAME.to_string(),
        }
    }
}

impl PipelineSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// `<config_dir>/FaceWatch/settings.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("settings.json"))
    }

    /// Loads settings from `path`, which must exist and parse. Without a
    /// path, the default location is used when present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn model_locator(&self) -> ModelLocator {
        ModelLocator::with_default_dirs(self.model_file_name.as_str(), &self.model_dirs)
    }
}
