pub mod artifact_store;
pub mod axum_handler;
pub mod error;
pub mod image_processor;
pub mod remote_engine;
