pub mod frame_source;
pub mod frame_source_factory;
