use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::shared::file_kind::is_video_file;
use crate::shared::frame::Frame;
use crate::source::domain::frame_source::{FrameSource, FrameSourceError};

use super::decode_session::DecodeSession;
use super::image_loader::load_frame;

enum Media {
    /// Decoded lazily on the first pull; `consumed` latches after it.
    Still { consumed: bool },
    /// `None` once the stream has ended or the source was closed.
    Video(Option<DecodeSession>),
}

/// Frames from a file on disk: one frame for a still image, successive
/// frames for a video. Extensions in the video allow-list take the video
/// path; everything else is read as a still image.
pub struct FileFrameSource {
    path: PathBuf,
    media: Media,
    closed: bool,
}

impl FileFrameSource {
    pub fn open(path: &Path) -> Result<Self, FrameSourceError> {
        if !path.exists() {
            return Err(FrameSourceError::NotFound(path.to_path_buf()));
        }

        let media = if is_video_file(path) {
            let session =
                DecodeSession::open_file(path).map_err(|e| FrameSourceError::OpenFailed {
                    target: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            log::info!(
                "Opened video {} ({}x{} @ {:.1} fps)",
                path.display(),
                session.width(),
                session.height(),
                session.fps()
            );
            Media::Video(Some(session))
        } else {
            Media::Still { consumed: false }
        };

        Ok(Self {
            path: path.to_path_buf(),
            media,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FrameSource for FileFrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        if self.closed {
            return None;
        }

        match &mut self.media {
            Media::Still { consumed } => {
                if *consumed {
                    return None;
                }
                *consumed = true;
                let path = self.path.clone();
                match tokio::task::spawn_blocking(move || load_frame(&path)).await {
                    Ok(Ok(frame)) if !frame.is_empty() => Some(frame),
                    Ok(Ok(_)) => None,
                    Ok(Err(e)) => {
                        log::warn!("Failed to read image {}: {e}", self.path.display());
                        None
                    }
                    Err(e) => {
                        log::warn!("Image read task for {} failed: {e}", self.path.display());
                        None
                    }
                }
            }
            Media::Video(slot) => {
                let session = slot.take()?;
                let (session, result) = session.read_off_runtime().await;
                match result {
                    Ok(Some(frame)) => {
                        *slot = session;
                        Some(frame)
                    }
                    Ok(None) => {
                        log::debug!("End of video {}", self.path.display());
                        None
                    }
                    Err(e) => {
                        log::warn!("Failed to decode {}: {e}", self.path.display());
                        None
                    }
                }
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.closed
            || match &self.media {
                Media::Still { consumed } => *consumed,
                Media::Video(slot) => slot.is_none(),
            }
    }

    fn source_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Media::Video(slot) = &mut self.media {
            *slot = None;
        }
    }
}
