use std::time::Duration;

pub const FACE_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";

/// Application directory name used under the platform config/cache roots.
pub const APP_DIR_NAME: &str = "FaceWatch";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "gif", "webp"];

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

/// Soft ~30 fps cap between loop iterations.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

pub const CAMERA_WIDTH: u32 = 640;
pub const CAMERA_HEIGHT: u32 = 480;
pub const CAMERA_FPS: u32 = 30;

/// Highest camera index scanned (exclusive) when listing devices.
pub const CAMERA_SCAN_LIMIT: u32 = 10;

pub const FACE_DETECTION_KEY: &str = "FaceDetection";
pub const FACE_DETECTION_ERROR_KEY: &str = "FaceDetectionError";
