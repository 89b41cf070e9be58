pub mod event_bus;
pub mod event_translator;
pub mod events;
pub mod pipeline_controller;
pub mod pipeline_settings;
pub mod run_stats;
