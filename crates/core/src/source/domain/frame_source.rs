use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::shared::frame::Frame;

/// Construction-time failures. A source that fails here is never handed to
/// the pipeline.
#[derive(Error, Debug)]
pub enum FrameSourceError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to open {target}: {reason}")]
    OpenFailed { target: String, reason: String },
}

/// Produces frames on demand from one underlying medium.
///
/// `next_frame` returning `None` means "no frame this call". Whether that is
/// transient (camera) or permanent (end of file) is reported by
/// [`FrameSource::is_exhausted`].
#[async_trait]
pub trait FrameSource: Send {
    /// Pulls the next frame. Ownership of the frame moves to the caller.
    async fn next_frame(&mut self) -> Option<Frame>;

    /// True once the source can never produce another frame.
    fn is_exhausted(&self) -> bool;

    /// Originating file, if the frames come from one.
    fn source_path(&self) -> Option<&Path> {
        None
    }

    /// Releases the underlying device or file handle. Idempotent; after this
    /// `next_frame` always returns `None`.
    fn close(&mut self);
}
