use std::path::Path;

use async_trait::async_trait;

use crate::shared::frame::Frame;
use crate::source::infrastructure::image_loader::load_frame;

use super::detection_result::{DetectionResult, FailureCause};

/// Answers "what faces are in this frame".
///
/// Implementations never fail with a fault: every problem, including a
/// missing model, comes back as [`DetectionResult::Failure`].
#[async_trait]
pub trait FaceDetectionService: Send + Sync {
    /// Label recorded on every result this service produces.
    fn method(&self) -> &str;

    /// Performs one-time setup on first success. A failed attempt is not
    /// remembered, so later calls retry.
    async fn is_initialized(&self) -> bool;

    /// Detects faces in `frame`, tagging each face with `source_path`.
    async fn detect_faces(&self, frame: &Frame, source_path: Option<&Path>) -> DetectionResult;

    /// Loads the image at `path` and detects faces in it.
    async fn detect_faces_in_file(&self, path: Option<&Path>) -> DetectionResult {
        let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
            return DetectionResult::failure(
                FailureCause::EmptyInput,
                "Image path is null or empty",
                self.method(),
            );
        };

        match load_frame(path) {
            Ok(frame) => self.detect_faces(&frame, Some(path)).await,
            Err(e) => DetectionResult::failure(
                FailureCause::LoadFailed,
                format!("Failed to load image at {}: {e}", path.display()),
                self.method(),
            ),
        }
    }
}
