use std::path::{Path, PathBuf};

use crate::shared::constants::APP_DIR_NAME;

/// Finds a model file by searching an ordered list of directories.
///
/// The search is repeated on every call; nothing about a miss is cached, so a
/// model copied in after startup is picked up on the next attempt.
#[derive(Clone, Debug)]
pub struct ModelLocator {
    file_name: String,
    candidate_dirs: Vec<PathBuf>,
}

impl ModelLocator {
    /// Searches exactly `candidate_dirs`, in order.
    pub fn new(file_name: impl Into<String>, candidate_dirs: Vec<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
            candidate_dirs,
        }
    }

    /// Searches `extra_dirs` first, then the standard locations:
    ///
    /// 1. Current working directory
    /// 2. Directory of the running executable
    /// 3. `resources/` next to the executable
    /// 4. User cache directory (`<cache>/FaceWatch/models`)
    pub fn with_default_dirs(file_name: impl Into<String>, extra_dirs: &[PathBuf]) -> Self {
        let mut dirs_list: Vec<PathBuf> = extra_dirs.to_vec();

        if let Ok(cwd) = std::env::current_dir() {
            dirs_list.push(cwd);
        }
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            let resources = exe_dir.join("resources");
            dirs_list.push(exe_dir);
            dirs_list.push(resources);
        }
        if let Some(cache) = model_cache_dir() {
            dirs_list.push(cache);
        }

        Self::new(file_name, dirs_list)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn candidates(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.candidate_dirs.iter().map(|dir| dir.join(&self.file_name))
    }

    /// First candidate that exists as a file.
    pub fn locate(&self) -> Option<PathBuf> {
        self.candidates().find(|path| path.is_file())
    }
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/FaceWatch/models/`
/// - Linux: `$XDG_CACHE_HOME/FaceWatch/models/` or `~/.cache/FaceWatch/models/`
/// - Windows: `%LOCALAPPDATA%/FaceWatch/models/`
pub fn model_cache_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir().map(|d| d.join(APP_DIR_NAME).join("models"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir().map(|d| d.join(APP_DIR_NAME).join("models"))
    }
}
