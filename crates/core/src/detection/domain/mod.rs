pub mod detection_result;
pub mod face_detection_service;
