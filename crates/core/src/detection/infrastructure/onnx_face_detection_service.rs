//! YOLO-pose face detection through ONNX Runtime (`ort`).
//!
//! The model is located and loaded lazily on first use. Inference runs on the
//! blocking pool; everything that can go wrong is reported as a
//! [`DetectionResult::Failure`].

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::detection::domain::detection_result::{
    BoundingBox, DetectedFace, DetectionResult, FailureCause, LandmarkPoint,
};
use crate::detection::domain::face_detection_service::FaceDetectionService;
use crate::shared::frame::Frame;

use super::model_locator::ModelLocator;

pub const METHOD: &str = "ONNX-YOLO";

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Detections scoring below this are discarded.
pub const MIN_CONFIDENCE: f64 = 0.25;

const NMS_IOU_THRESH: f64 = 0.45;

/// Smallest face edge, in source pixels, that is reported.
pub const MIN_FACE_SIZE: f64 = 30.0;

/// 5 landmarks × (x, y, conf).
const NUM_KEYPOINT_VALUES: usize = 15;

/// Minimum keypoint confidence to report a landmark.
const KEYPOINT_CONF_THRESH: f64 = 0.5;

type SendError = Box<dyn std::error::Error + Send + Sync>;

struct LoadedModel {
    session: Mutex<ort::session::Session>,
    input_size: u32,
}

impl LoadedModel {
    fn load(path: &Path) -> Result<Self, SendError> {
        let session = ort::session::Session::builder()
            .map_err(|e| e.to_string())?
            .commit_from_file(path)
            .map_err(|e| e.to_string())?;

        // NCHW: [1, 3, H, W]; square input, so H is enough.
        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    if shape.len() >= 4 && shape[2] > 0 {
                        Some(shape[2] as u32)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        Ok(Self {
            session: Mutex::new(session),
            input_size,
        })
    }

    fn infer(
        &self,
        input: ndarray::Array4<f32>,
        geometry: Letterbox,
    ) -> Result<Vec<RawDetection>, SendError> {
        let mut session = lock_recovering(&self.session);

        let input_value = ort::value::Tensor::from_array(input).map_err(|e| e.to_string())?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| e.to_string())?;
        if outputs.len() == 0 {
            return Err("face model produced no outputs".into());
        }
        let tensor = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| e.to_string())?;
        let shape = tensor.shape().to_vec();
        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;

        let mut raw = parse_output(data, &shape, &geometry, MIN_CONFIDENCE)?;
        Ok(nms(&mut raw, NMS_IOU_THRESH))
    }
}

/// A panic inside one inference poisons the lock but leaves the session
/// usable, so later frames keep being detected.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Default [`FaceDetectionService`]: a YOLO-pose face model.
pub struct OnnxFaceDetectionService {
    locator: ModelLocator,
    model: OnceCell<Arc<LoadedModel>>,
}

impl OnnxFaceDetectionService {
    pub fn new(locator: ModelLocator) -> Self {
        Self {
            locator,
            model: OnceCell::new(),
        }
    }

    /// Returns the loaded model, trying to locate and load it if no earlier
    /// attempt succeeded. Concurrent first callers share one load.
    async fn loaded_model(&self) -> Option<Arc<LoadedModel>> {
        let result = self
            .model
            .get_or_try_init(|| async {
                let path = self.locator.locate().ok_or_else(|| -> SendError {
                    format!("{} not found in any model directory", self.locator.file_name()).into()
                })?;
                log::info!("Loading face model from {}", path.display());
                let model = tokio::task::spawn_blocking(move || LoadedModel::load(&path))
                    .await
                    .map_err(|e| -> SendError { e.to_string().into() })??;
                Ok::<_, SendError>(Arc::new(model))
            })
            .await;

        match result {
            Ok(model) => Some(model.clone()),
            Err(e) => {
                log::debug!("Face detection model unavailable: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl FaceDetectionService for OnnxFaceDetectionService {
    fn method(&self) -> &str {
        METHOD
    }

    async fn is_initialized(&self) -> bool {
        self.loaded_model().await.is_some()
    }

    async fn detect_faces(&self, frame: &Frame, source_path: Option<&Path>) -> DetectionResult {
        if frame.is_empty() {
            return DetectionResult::failure(FailureCause::EmptyInput, "Input image is empty", METHOD);
        }
        if !frame.is_well_formed() {
            return DetectionResult::failure(
                FailureCause::EmptyInput,
                format!(
                    "Input image buffer holds {} bytes, expected {}x{}x{}",
                    frame.data().len(),
                    frame.width(),
                    frame.height(),
                    frame.channels()
                ),
                METHOD,
            );
        }

        let Some(model) = self.loaded_model().await else {
            return DetectionResult::failure(
                FailureCause::NotInitialized,
                "Face detection service not initialized. Model file not found.",
                METHOD,
            );
        };

        let (input, geometry) = letterbox(frame, model.input_size);
        let joined = tokio::task::spawn_blocking(move || model.infer(input, geometry)).await;

        let detections = match joined {
            Ok(Ok(detections)) => detections,
            Ok(Err(e)) => {
                return DetectionResult::failure(
                    FailureCause::DetectorError,
                    format!("Face detection failed: {e}"),
                    METHOD,
                )
            }
            Err(e) => {
                return DetectionResult::failure(
                    FailureCause::DetectorError,
                    format!("Face detection failed: {e}"),
                    METHOD,
                )
            }
        };

        let faces = detections
            .iter()
            .filter(|d| d.x2 - d.x1 >= MIN_FACE_SIZE && d.y2 - d.y1 >= MIN_FACE_SIZE)
            .map(|d| to_detected_face(d, frame.width(), frame.height(), source_path))
            .collect();
        DetectionResult::success(faces, METHOD)
    }
}

fn to_detected_face(
    det: &RawDetection,
    frame_w: u32,
    frame_h: u32,
    source_path: Option<&Path>,
) -> DetectedFace {
    let fw = frame_w as f64;
    let fh = frame_h as f64;
    let x1 = det.x1.clamp(0.0, fw).round();
    let y1 = det.y1.clamp(0.0, fh).round();
    let x2 = det.x2.clamp(0.0, fw).round();
    let y2 = det.y2.clamp(0.0, fh).round();

    let bbox = BoundingBox::new(x1 as i32, y1 as i32, (x2 - x1) as i32, (y2 - y1) as i32);
    let landmarks = det
        .keypoints
        .iter()
        .flatten()
        .map(|&(x, y)| LandmarkPoint::new_2d(x, y))
        .collect();

    DetectedFace::new(bbox, det.confidence)
        .with_landmarks(landmarks)
        .with_image_path(source_path)
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Mapping from model input coordinates back to frame coordinates.
#[derive(Clone, Copy, Debug)]
struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn to_frame(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

/// Letterbox-resize a frame to `target_size` × `target_size` as an NCHW
/// float tensor. Gray frames are replicated across the three channels.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, Letterbox) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = (fw * scale).round() as u32;
    let new_h = (fh * scale).round() as u32;
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Padding is 114/255 gray (YOLO convention)
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let last_channel = frame.channels() as usize - 1;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c.min(last_channel)]] as f32 / 255.0;
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct RawDetection {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    confidence: f64,
    keypoints: Option<Vec<(f64, f64)>>,
}

/// Decodes a YOLO output tensor into frame-space detections.
///
/// Accepts `[1, features, detections]` (transposed) or
/// `[1, detections, features]`. Rows are `[cx, cy, w, h, conf, kp...]`.
fn parse_output(
    data: &[f32],
    shape: &[usize],
    geometry: &Letterbox,
    min_confidence: f64,
) -> Result<Vec<RawDetection>, SendError> {
    if shape.len() != 3 {
        return Err(format!("Unexpected model output shape: {shape:?}").into());
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if data.len() < num_dets * num_feats {
        return Err(format!("Model output has {} values, expected {}", data.len(), num_dets * num_feats).into());
    }

    let mut dets = Vec::new();
    for i in 0..num_dets {
        let row: Vec<f32> = if transposed {
            (0..num_feats).map(|f| data[f * num_dets + i]).collect()
        } else {
            data[i * num_feats..(i + 1) * num_feats].to_vec()
        };

        if row.len() < 5 {
            continue;
        }
        let conf = row[4] as f64;
        if conf.is_nan() || conf < min_confidence {
            continue;
        }

        let (cx, cy, w, h) = (row[0] as f64, row[1] as f64, row[2] as f64, row[3] as f64);
        let (x1, y1) = geometry.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = geometry.to_frame(cx + w / 2.0, cy + h / 2.0);

        let keypoints = (row.len() >= 5 + NUM_KEYPOINT_VALUES).then(|| {
            (0..5)
                .filter(|k| row[5 + k * 3 + 2] as f64 >= KEYPOINT_CONF_THRESH)
                .map(|k| geometry.to_frame(row[5 + k * 3] as f64, row[5 + k * 3 + 1] as f64))
                .collect()
        });

        dets.push(RawDetection {
            x1,
            y1,
            x2,
            y2,
            confidence: conf,
            keypoints,
        });
    }
    Ok(dets)
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
fn nms(dets: &mut [RawDetection], iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; dets.len()];

    for i in 0..dets.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(dets[i].clone());
        for j in (i + 1)..dets.len() {
            if suppressed[j] {
                continue;
            }
            let iou = bbox_iou(
                &[dets[i].x1, dets[i].y1, dets[i].x2, dets[i].y2],
                &[dets[j].x1, dets[j].y1, dets[j].x2, dets[j].y2],
            );
            if iou > iou_thresh {
                suppressed[j] = true;
            }
        }
    }
    keep
}

fn bbox_iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
