use std::path::Path;

use crate::source::domain::frame_source::{FrameSource, FrameSourceError};
use crate::source::domain::frame_source_factory::FrameSourceFactory;

use super::camera_frame_source::CameraFrameSource;
use super::file_frame_source::FileFrameSource;

/// Builds the file/video and camera sources. Validation lives in the sources.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFrameSourceFactory;

impl FrameSourceFactory for DefaultFrameSourceFactory {
    fn create_file_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, FrameSourceError> {
        Ok(Box::new(FileFrameSource::open(path)?))
    }

    fn create_camera_source(&self, index: u32) -> Result<Box<dyn FrameSource>, FrameSourceError> {
        Ok(Box::new(CameraFrameSource::open(index)?))
    }
}
