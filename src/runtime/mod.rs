pub mod context;
pub mod core_extension;
pub mod extension;
pub mod mb_extension;
pub mod registry;
pub mod resource_manager;
pub mod stream_extension;
