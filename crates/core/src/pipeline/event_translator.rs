use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::detection::domain::detection_result::{DetectedFace, DetectionResult};
use crate::shared::constants::{FACE_DETECTION_ERROR_KEY, FACE_DETECTION_KEY};

use super::events::{FaceEvent, MetadataEvent, MetadataSubject, PipelineEvent};

/// Turns one [`DetectionResult`] into the events the pipeline emits for it.
///
/// Success: a `FaceDetected` + `FaceDetection` metadata pair per face, in
/// detector order. Failure: a single `FaceDetectionError` metadata event.
pub struct EventTranslator {
    next_face_id: AtomicU64,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self {
            next_face_id: AtomicU64::new(1),
        }
    }

    pub fn translate(&self, result: &DetectionResult) -> Vec<PipelineEvent> {
        match result {
            DetectionResult::Success { faces, method } => faces
                .iter()
                .flat_map(|face| {
                    let event = self.face_event(face, method);
                    let summary = MetadataEvent::new(
                        FACE_DETECTION_KEY,
                        summarize(face),
                        MetadataSubject::Face(event.id),
                    );
                    [PipelineEvent::FaceDetected(event), PipelineEvent::Metadata(summary)]
                })
                .collect(),
            DetectionResult::Failure { message, .. } => vec![PipelineEvent::Metadata(
                MetadataEvent::new(FACE_DETECTION_ERROR_KEY, message.as_str(), MetadataSubject::Pipeline),
            )],
        }
    }

    fn face_event(&self, face: &DetectedFace, method: &str) -> FaceEvent {
        let landmarks_json = serde_json::to_string(face.landmarks()).unwrap_or_else(|e| {
            log::warn!("Could not serialize landmarks: {e}");
            "[]".to_string()
        });

        FaceEvent {
            id: self.next_face_id.fetch_add(1, Ordering::Relaxed),
            captured_at: Utc::now(),
            bounding_box: face.bounding_box(),
            confidence: face.confidence(),
            landmarks_json,
            source_path: face.image_path().map(|p| p.to_path_buf()),
            detection_method: method.to_string(),
        }
    }
}

impl Default for EventTranslator {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(face: &DetectedFace) -> String {
    let b = face.bounding_box();
    format!(
        "Face at ({}, {}) size {}x{}, confidence {:.2}",
        b.x,
        b.y,
        b.width,
        b.height,
        face.confidence()
    )
}
