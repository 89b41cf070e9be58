use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detection::domain::detection_result::BoundingBox;

/// One detected face, timestamped at the moment the pipeline saw it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceEvent {
    /// Sequence number, unique per controller.
    pub id: u64,
    pub captured_at: DateTime<Utc>,
    pub bounding_box: BoundingBox,
    pub confidence: f64,
    /// Landmark points as a JSON array (`[]` when the detector gave none).
    pub landmarks_json: String,
    pub source_path: Option<PathBuf>,
    pub detection_method: String,
}

/// What a [`MetadataEvent`] is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MetadataSubject {
    Face(u64),
    Pipeline,
}

/// Free-form key/value annotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetadataEvent {
    pub key: String,
    pub value: String,
    pub subject: MetadataSubject,
}

impl MetadataEvent {
    pub fn new(key: impl Into<String>, value: impl Into<String>, subject: MetadataSubject) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            subject,
        }
    }
}

/// Detection-derived events, in emission order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    FaceDetected(FaceEvent),
    Metadata(MetadataEvent),
}
