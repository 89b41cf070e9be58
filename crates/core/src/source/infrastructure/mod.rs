pub mod camera_frame_source;
pub(crate) mod decode_session;
pub mod default_frame_source_factory;
pub mod file_frame_source;
pub mod image_loader;
