//! Extension-based media classification.
//!
//! Routing between the still-image and video paths is decided by extension
//! alone; file contents are never sniffed.

use std::path::Path;

use super::constants::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};

fn extension_in(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| allowed.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_image_file(path: &Path) -> bool {
    extension_in(path, IMAGE_EXTENSIONS)
}

pub fn is_video_file(path: &Path) -> bool {
    extension_in(path, VIDEO_EXTENSIONS)
}

pub fn is_file_supported(path: &Path) -> bool {
    is_image_file(path) || is_video_file(path)
}
