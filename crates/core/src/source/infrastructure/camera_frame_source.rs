use async_trait::async_trait;
use serde::Serialize;

use crate::shared::constants::{CAMERA_FPS, CAMERA_HEIGHT, CAMERA_SCAN_LIMIT, CAMERA_WIDTH};
use crate::shared::frame::Frame;
use crate::source::domain::frame_source::{FrameSource, FrameSourceError};

use super::decode_session::DecodeSession;

/// Description of an open capture device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Live frames from a capture device, opened by index.
///
/// Capture is requested at a fixed 640x480 @ 30 fps with demuxer buffering
/// disabled, so each read returns the most recent frame. An empty read is
/// transient: the camera never reports exhaustion.
pub struct CameraFrameSource {
    index: u32,
    session: Option<DecodeSession>,
}

impl CameraFrameSource {
    pub fn open(index: u32) -> Result<Self, FrameSourceError> {
        let open_failed = |reason: String| FrameSourceError::OpenFailed {
            target: format!("camera {index}"),
            reason,
        };

        let (format_name, url) = device_address(index)
            .ok_or_else(|| open_failed("camera capture is not supported on this platform".into()))?;

        let session = DecodeSession::open_device(format_name, &url, capture_options())
            .map_err(|e| open_failed(e.to_string()))?;

        log::info!(
            "Opened camera {index} via {format_name} ({}x{} @ {:.1} fps)",
            session.width(),
            session.height(),
            session.fps()
        );

        Ok(Self {
            index,
            session: Some(session),
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Reports the negotiated capture format, or `None` once closed.
    pub fn info(&self) -> Option<CameraInfo> {
        self.session.as_ref().map(|s| CameraInfo {
            index: self.index,
            name: format!("Camera {}", self.index),
            width: s.width(),
            height: s.height(),
            fps: s.fps(),
        })
    }
}

#[async_trait]
impl FrameSource for CameraFrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        let session = self.session.take()?;
        let (session, result) = session.read_off_runtime().await;
        self.session = session;
        match result {
            Ok(frame) => frame.filter(|f| !f.is_empty()),
            Err(e) => {
                log::warn!("Camera {} read failed: {e}", self.index);
                None
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        false
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            log::info!("Closed camera {}", self.index);
        }
    }
}

/// Scans camera indices `0..CAMERA_SCAN_LIMIT` and reports the ones that open.
pub fn available_cameras() -> Vec<CameraInfo> {
    (0..CAMERA_SCAN_LIMIT)
        .filter_map(|index| match CameraFrameSource::open(index) {
            Ok(mut camera) => {
                let info = camera.info();
                camera.close();
                info
            }
            Err(e) => {
                log::debug!("Camera {index} unavailable: {e}");
                None
            }
        })
        .collect()
}

fn capture_options() -> ffmpeg_next::Dictionary<'static> {
    let mut options = ffmpeg_next::Dictionary::new();
    options.set("video_size", &format!("{CAMERA_WIDTH}x{CAMERA_HEIGHT}"));
    options.set("framerate", &CAMERA_FPS.to_string());
    options.set("fflags", "nobuffer");
    options
}

/// ffmpeg input device name and URL for a camera index.
fn device_address(index: u32) -> Option<(&'static str, String)> {
    if cfg!(target_os = "linux") {
        Some(("v4l2", format!("/dev/video{index}")))
    } else if cfg!(target_os = "macos") {
        Some(("avfoundation", index.to_string()))
    } else {
        None
    }
}
