pub mod constants;
pub mod file_kind;
pub mod frame;
