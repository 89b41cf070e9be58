pub mod model_locator;
pub mod onnx_face_detection_service;
