use std::path::Path;

use super::frame_source::{FrameSource, FrameSourceError};

/// Builds frame sources. Each call yields a fresh, independently owned source.
pub trait FrameSourceFactory: Send + Sync {
    fn create_file_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, FrameSourceError>;

    fn create_camera_source(&self, index: u32) -> Result<Box<dyn FrameSource>, FrameSourceError>;
}
