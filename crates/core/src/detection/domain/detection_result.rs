use std::path::{Path, PathBuf};

use serde::Serialize;

/// Axis-aligned face box in integer pixel coordinates, origin top-left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A landmark position; `z` is present only for 3D landmark models.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LandmarkPoint {
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl LandmarkPoint {
    pub fn new_2d(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn new_3d(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }
}

/// One face found by a detector.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedFace {
    bounding_box: BoundingBox,
    confidence: f64,
    landmarks: Vec<LandmarkPoint>,
    image_path: Option<PathBuf>,
}

impl DetectedFace {
    /// Confidence is clamped into [0, 1]; NaN becomes 0.
    pub fn new(bounding_box: BoundingBox, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            bounding_box,
            confidence,
            landmarks: Vec::new(),
            image_path: None,
        }
    }

    pub fn with_landmarks(mut self, landmarks: Vec<LandmarkPoint>) -> Self {
        self.landmarks = landmarks;
        self
    }

    pub fn with_image_path(mut self, path: Option<&Path>) -> Self {
        self.image_path = path.map(Path::to_path_buf);
        self
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn landmarks(&self) -> &[LandmarkPoint] {
        &self.landmarks
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image_path.as_deref()
    }
}

/// Coarse reason a detection did not run to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureCause {
    NotInitialized,
    EmptyInput,
    LoadFailed,
    DetectorError,
}

/// Outcome of running detection on one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionResult {
    /// Faces in the detector's native order.
    Success {
        faces: Vec<DetectedFace>,
        method: String,
    },
    Failure {
        cause: FailureCause,
        message: String,
        method: String,
    },
}

impl DetectionResult {
    pub fn success(faces: Vec<DetectedFace>, method: impl Into<String>) -> Self {
        DetectionResult::Success {
            faces,
            method: method.into(),
        }
    }

    pub fn failure(
        cause: FailureCause,
        message: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        DetectionResult::Failure {
            cause,
            message: message.into(),
            method: method.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DetectionResult::Success { .. })
    }

    /// Detected faces; empty for failures.
    pub fn faces(&self) -> &[DetectedFace] {
        match self {
            DetectionResult::Success { faces, .. } => faces,
            DetectionResult::Failure { .. } => &[],
        }
    }

    pub fn method(&self) -> &str {
        match self {
            DetectionResult::Success { method, .. } | DetectionResult::Failure { method, .. } => {
                method
            }
        }
    }

    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            DetectionResult::Failure { cause, .. } => Some(*cause),
            DetectionResult::Success { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            DetectionResult::Failure { message, .. } => Some(message),
            DetectionResult::Success { .. } => None,
        }
    }
}
